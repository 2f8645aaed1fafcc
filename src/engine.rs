use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::job::{CommandDescriptor, Job, JobId, JobRegistry, JobStatus, JobSummary, StatusView};
use crate::worker::{spawn_capture, ProcessHandle, ProcessLauncher, StreamKind, Supervisor};
use crate::workload::PreparedLaunch;

/// Entry point for running and controlling external jobs.
///
/// One engine owns one [`JobRegistry`]. It is constructed at service start,
/// shared behind an `Arc` with the request layer, and torn down with
/// [`shutdown`](Self::shutdown), which stops every job still running.
#[derive(Debug)]
pub struct ExecutionEngine {
    registry: Arc<JobRegistry>,
    launcher: ProcessLauncher,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            registry: Arc::new(JobRegistry::new()),
            launcher: ProcessLauncher::new(),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Launch `command` and return immediately with the new job's id.
    pub async fn start(
        &self,
        command: CommandDescriptor,
        timeout: Option<Duration>,
    ) -> Result<JobId> {
        self.spawn_job(PreparedLaunch::new(command), timeout).await
    }

    /// Launch a prepared workload. The job takes ownership of its scratch
    /// files; they are deleted when the job finishes, or right away if the
    /// launch fails.
    pub async fn start_prepared(
        &self,
        launch: PreparedLaunch,
        timeout: Option<Duration>,
    ) -> Result<JobId> {
        self.spawn_job(launch, timeout).await
    }

    async fn spawn_job(&self, launch: PreparedLaunch, timeout: Option<Duration>) -> Result<JobId> {
        let PreparedLaunch {
            descriptor: command,
            temp_resources,
            display,
        } = launch;
        let mut child = match self.launcher.launch(&command) {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(command = %command.display(), error = %e, "Launch failed");
                remove_scratch(&temp_resources).await;
                return Err(e);
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let id = JobId::new();
        let job = Arc::new(
            Job::new(
                id,
                command,
                timeout,
                ProcessHandle::new(child),
                temp_resources,
            )
            .with_display(display),
        );
        self.registry.register(job.clone()).await?;

        match (stdout, stderr) {
            (Some(out), Some(err)) => {
                job.add_capture_task(spawn_capture(job.clone(), out, StreamKind::Stdout))
                    .await;
                job.add_capture_task(spawn_capture(job.clone(), err, StreamKind::Stderr))
                    .await;
            }
            _ => {
                tracing::error!(job_id = %id, "Output pipes unavailable");
                job.stderr
                    .append("Error: output pipes of the process could not be captured")
                    .await;
                job.request_finalize(JobStatus::Error);
            }
        }

        tracing::info!(
            job_id = %id,
            pid = ?job.process().pid(),
            timeout_secs = timeout.map(|t| t.as_secs()),
            "Job started"
        );
        Supervisor::spawn(job, self.config.clone());
        Ok(id)
    }

    pub async fn get_status(&self, id: &JobId) -> Result<StatusView> {
        let job = self.registry.get(id).await?;
        Ok(job.view().await)
    }

    /// Stop a running job, or return the frozen status of a finished one.
    ///
    /// Returns once the job is terminal. If another ending (natural exit,
    /// timeout) was already decided, that one stands.
    pub async fn terminate(&self, id: &JobId) -> Result<StatusView> {
        let job = self.registry.get(id).await?;
        if job.request_finalize(JobStatus::Terminated) {
            tracing::info!(job_id = %id, "Termination requested");
        }
        job.wait_finished().await;
        Ok(job.view().await)
    }

    /// Summaries of all known jobs, most recently started first.
    pub async fn list(&self) -> Vec<JobSummary> {
        self.registry.list().await
    }

    /// Wait until the job is terminal and return its final view.
    pub async fn wait(&self, id: &JobId) -> Result<StatusView> {
        let job = self.registry.get(id).await?;
        job.wait_finished().await;
        Ok(job.view().await)
    }

    pub async fn evict(&self, id: &JobId) -> Result<bool> {
        self.registry.evict(id).await
    }

    /// Run retention sweeps until `shutdown` fires.
    pub async fn run_retention(&self, shutdown: CancellationToken) {
        let policy = &self.config.retention;
        let mut interval = tokio::time::interval(policy.sweep_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Retention task stopping");
                    return;
                }
                _ = interval.tick() => {
                    self.registry.sweep(policy, Instant::now()).await;
                }
            }
        }
    }

    /// Terminate every running job and wait for all of them to finish.
    pub async fn shutdown(&self) {
        let running = self.registry.running_jobs().await;
        if running.is_empty() {
            return;
        }
        tracing::info!(count = running.len(), "Terminating running jobs");
        for job in &running {
            job.request_finalize(JobStatus::Terminated);
        }
        for job in running {
            job.wait_finished().await;
        }
    }
}

async fn remove_scratch(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove scratch file");
            }
        }
    }
}

