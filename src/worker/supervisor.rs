//! Per-job supervisor: watches the process, enforces the timeout and carries
//! out finalization.
//!
//! Every job gets exactly one supervisor task. Whoever decides the ending
//! (the supervisor itself on natural exit or timeout, a `terminate` caller,
//! or engine shutdown) only *claims* it on the job's [`StatusCell`]. The
//! supervisor is the single executor of the claim: it stops the process if
//! needed, waits for the capture tasks to drain, annotates the log, releases
//! the handle, deletes scratch files and finally publishes the outcome.
//!
//! [`StatusCell`]: crate::job::StatusCell

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::job::{Job, JobStatus};

/// What the watch loop decided, and what it already knows about the exit.
#[derive(Debug)]
struct Verdict {
    intent: JobStatus,
    exit: Option<ExitStatus>,
    detail: Option<String>,
}

pub struct Supervisor {
    job: Arc<Job>,
    config: EngineConfig,
}

impl Supervisor {
    pub fn new(job: Arc<Job>, config: EngineConfig) -> Self {
        Self { job, config }
    }

    pub fn spawn(job: Arc<Job>, config: EngineConfig) -> JoinHandle<()> {
        tokio::spawn(Self::new(job, config).run())
    }

    pub async fn run(self) {
        let mut guard = AbandonGuard::new(self.job.clone(), self.config.kill_wait);
        let verdict = self.watch().await;
        self.finalize(verdict).await;
        guard.disarm();
    }

    async fn watch(&self) -> Verdict {
        let job = &self.job;
        let cell = job.status_cell();

        loop {
            if let Some(intent) = cell.claimed() {
                return Verdict {
                    intent,
                    exit: None,
                    detail: None,
                };
            }

            match job.process().try_exit().await {
                Ok(Some(status)) => {
                    let intent = if status.success() {
                        JobStatus::Completed
                    } else {
                        JobStatus::Failed
                    };
                    if cell.claim(intent) {
                        return Verdict {
                            intent,
                            exit: Some(status),
                            detail: None,
                        };
                    }
                    // Lost to a concurrent claim; pick it up at the top
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to poll process");
                    if cell.claim(JobStatus::Error) {
                        return Verdict {
                            intent: JobStatus::Error,
                            exit: None,
                            detail: Some(format!("Error monitoring process: {}", e)),
                        };
                    }
                    continue;
                }
            }

            let now = Instant::now();
            let mut nap = self.config.poll_interval;
            if let Some(deadline) = job.deadline() {
                if now >= deadline {
                    if cell.claim(JobStatus::TimedOut) {
                        tracing::warn!(
                            job_id = %job.id,
                            timeout_secs = job.timeout.map(|t| t.as_secs_f64()),
                            "Job exceeded its timeout"
                        );
                        return Verdict {
                            intent: JobStatus::TimedOut,
                            exit: None,
                            detail: None,
                        };
                    }
                    continue;
                }
                nap = nap.min(deadline - now);
            }

            tokio::select! {
                _ = job.interrupt_token().cancelled() => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    async fn finalize(&self, verdict: Verdict) {
        let job = &self.job;
        let mut status = verdict.intent;
        let mut exit = verdict.exit;
        let mut detail = verdict.detail;

        if exit.is_none() {
            match job
                .process()
                .stop(self.config.grace_period, self.config.kill_wait)
                .await
            {
                Ok(s) => exit = Some(s),
                Err(e) => {
                    tracing::error!(job_id = %job.id, pid = ?job.process().pid(), error = %e, "Failed to stop process");
                    status = JobStatus::Error;
                    detail = Some(format!("Failed to stop process: {}", e));
                }
            }
        }

        // Descendants may still hold the output pipes open
        if let Err(e) = job.process().kill_group() {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to kill leftover process group");
        }

        // Drain what the process wrote before it went away
        for mut task in job.take_capture_tasks().await {
            if tokio::time::timeout(self.config.drain_timeout, &mut task)
                .await
                .is_err()
            {
                tracing::warn!(job_id = %job.id, "Output stream still open after drain timeout");
                task.abort();
            }
        }

        let exit_code = exit.and_then(|s| s.code());
        let note = match status {
            JobStatus::Running | JobStatus::Completed => None,
            JobStatus::Failed => Some(match exit_code {
                Some(code) => format!("Process exited with return code {}", code),
                None => format!(
                    "Process exited abnormally ({})",
                    exit.map(|s| s.to_string()).unwrap_or_default()
                ),
            }),
            JobStatus::TimedOut => Some("Execution timed out and was terminated.".to_string()),
            JobStatus::Terminated => Some("Execution was manually terminated.".to_string()),
            JobStatus::Error => Some(detail.unwrap_or_else(|| "Internal error".to_string())),
        };
        if let Some(note) = note {
            job.stderr.append(note).await;
        }

        job.process().release().await;
        remove_temp_resources(job).await;

        job.status_cell().publish(status, exit_code);
        tracing::info!(
            job_id = %job.id,
            status = %status,
            exit_code = ?exit_code,
            elapsed_ms = job.elapsed().as_millis() as u64,
            "Job finished"
        );
        job.mark_done();
    }
}

async fn remove_temp_resources(job: &Job) {
    for path in job.take_temp_resources().await {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(job_id = %job.id, path = %path.display(), "Removed scratch file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(job_id = %job.id, path = %path.display(), error = %e, "Failed to remove scratch file")
            }
        }
    }
}

/// Finalizes the job as `Error` if the supervisor unwinds or is aborted
/// before publishing an outcome.
///
/// Cleanup runs on a fresh task: the process group is killed, the capture
/// tasks are stopped and scratch files are removed before the outcome is
/// published.
struct AbandonGuard {
    job: Option<Arc<Job>>,
    kill_wait: Duration,
}

impl AbandonGuard {
    fn new(job: Arc<Job>, kill_wait: Duration) -> Self {
        Self {
            job: Some(job),
            kill_wait,
        }
    }

    fn disarm(&mut self) {
        self.job = None;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        let Some(job) = self.job.take() else {
            return;
        };
        if job.is_terminal() {
            job.mark_done();
            return;
        }
        tracing::error!(job_id = %job.id, "Supervisor exited before finalizing");
        job.status_cell().claim(JobStatus::Error);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let kill_wait = self.kill_wait;
                handle.spawn(abandon(job, kill_wait));
            }
            Err(_) => {
                // Runtime is gone; the child is killed when the job is dropped
                let _ = job.process().kill_group();
                job.status_cell().publish(JobStatus::Error, None);
                job.mark_done();
            }
        }
    }
}

async fn abandon(job: Arc<Job>, kill_wait: Duration) {
    let process = job.process();
    if let Err(e) = process.force_kill().await {
        tracing::warn!(job_id = %job.id, error = %e, "Failed to kill abandoned process");
    }
    let exit = process.wait_exit(kill_wait).await.ok().flatten();
    let _ = process.kill_group();
    for task in job.take_capture_tasks().await {
        task.abort();
    }

    job.stderr
        .append("Supervisor failed unexpectedly, process was killed")
        .await;
    process.release().await;
    remove_temp_resources(&job).await;

    job.status_cell()
        .publish(JobStatus::Error, exit.and_then(|s| s.code()));
    job.mark_done();
}
