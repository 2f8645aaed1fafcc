use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::config::RetentionPolicy;
use crate::error::{Result, RunnerError};
use crate::job::{Job, JobId, JobSummary};

/// Result of one retention pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Terminal jobs moved out of the active view
    pub evicted: usize,
    /// Terminal jobs removed from the registry
    pub removed: usize,
}

/// Shared table of all known jobs.
///
/// The map lock is only held to insert, remove or clone out `Arc<Job>`
/// entries; per-job state is read after the lock is released, so queries
/// never wait on a job's I/O and never block each other for long.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new job. Fails if its id is already present.
    pub async fn register(&self, job: Arc<Job>) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(RunnerError::DuplicateId(job.id));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    pub async fn get(&self, id: &JobId) -> Result<Arc<Job>> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(RunnerError::NotFound(*id))
    }

    /// All jobs, most recently started first.
    pub async fn all_jobs(&self) -> Vec<Arc<Job>> {
        let mut jobs: Vec<Arc<Job>> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        jobs
    }

    /// Summaries of all jobs, most recently started first.
    pub async fn list(&self) -> Vec<JobSummary> {
        let jobs = self.all_jobs().await;
        let mut summaries = Vec::with_capacity(jobs.len());
        for job in jobs {
            summaries.push(job.summary().await);
        }
        summaries
    }

    /// Jobs whose outcome has not been published yet
    pub async fn running_jobs(&self) -> Vec<Arc<Job>> {
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| !j.is_terminal())
            .cloned()
            .collect()
    }

    /// Move a terminal job out of the active view. Its status and logs stay
    /// queryable. Returns false for running jobs and already evicted ones.
    pub async fn evict(&self, id: &JobId) -> Result<bool> {
        let job = self.get(id).await?;
        if !job.is_terminal() {
            return Ok(false);
        }
        let evicted = job.deactivate();
        if evicted {
            tracing::info!(job_id = %id, "Job evicted from active view");
        }
        Ok(evicted)
    }

    /// Remove a terminal job entirely. Running jobs are left in place.
    pub async fn remove(&self, id: &JobId) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get(id) {
            None => Err(RunnerError::NotFound(*id)),
            Some(job) if !job.is_terminal() => Ok(false),
            Some(_) => {
                jobs.remove(id);
                Ok(true)
            }
        }
    }

    /// Apply `policy` to all terminal jobs as of `now`.
    pub async fn sweep(&self, policy: &RetentionPolicy, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        let mut jobs = self.jobs.write().await;

        let mut finished: Vec<(JobId, Instant)> = Vec::new();
        jobs.retain(|id, job| {
            let Some(outcome) = job.outcome() else {
                return true;
            };
            let age = now.saturating_duration_since(outcome.finished);
            if age >= policy.history_ttl {
                report.removed += 1;
                return false;
            }
            if age >= policy.active_window && job.deactivate() {
                report.evicted += 1;
            }
            finished.push((*id, outcome.finished));
            true
        });

        if finished.len() > policy.max_history {
            finished.sort_by_key(|(_, at)| *at);
            let excess = finished.len() - policy.max_history;
            for (id, _) in finished.into_iter().take(excess) {
                jobs.remove(&id);
                report.removed += 1;
            }
        }

        if report != SweepReport::default() {
            tracing::info!(
                evicted = report.evicted,
                removed = report.removed,
                remaining = jobs.len(),
                "Retention sweep"
            );
        }
        report
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CommandDescriptor, JobStatus};
    use crate::worker::ProcessHandle;
    use std::time::Duration;

    fn test_job(label: &str) -> Arc<Job> {
        Arc::new(Job::new(
            JobId::new(),
            CommandDescriptor::new("echo").arg(label),
            None,
            ProcessHandle::released(),
            Vec::new(),
        ))
    }

    fn finish(job: &Job, status: JobStatus) {
        assert!(job.status_cell().claim(status));
        assert!(job.status_cell().publish(status, Some(0)));
    }

    #[tokio::test]
    async fn register_and_get() {
        let registry = JobRegistry::new();
        let job = test_job("a");
        let id = job.id;

        registry.register(job).await.unwrap();
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.get(&id).await.unwrap().id, id);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let registry = JobRegistry::new();
        let job = test_job("a");
        registry.register(job.clone()).await.unwrap();

        let err = registry.register(job).await.unwrap_err();
        assert!(matches!(err, RunnerError::DuplicateId(_)));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let registry = JobRegistry::new();
        let err = registry.get(&JobId::new()).await.unwrap_err();
        assert!(matches!(err, RunnerError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_is_newest_first_regardless_of_insert_order() {
        let registry = JobRegistry::new();
        let mut jobs = Vec::new();
        for label in ["first", "second", "third"] {
            jobs.push(test_job(label));
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        // Insert out of start order
        registry.register(jobs[1].clone()).await.unwrap();
        registry.register(jobs[2].clone()).await.unwrap();
        registry.register(jobs[0].clone()).await.unwrap();

        let ids: Vec<JobId> = registry
            .list()
            .await
            .into_iter()
            .map(|s| s.execution_id)
            .collect();
        assert_eq!(ids, vec![jobs[2].id, jobs[1].id, jobs[0].id]);
    }

    #[tokio::test]
    async fn evict_only_touches_terminal_jobs() {
        let registry = JobRegistry::new();
        let running = test_job("running");
        let done = test_job("done");
        registry.register(running.clone()).await.unwrap();
        registry.register(done.clone()).await.unwrap();
        finish(&done, JobStatus::Completed);

        assert!(!registry.evict(&running.id).await.unwrap());
        assert!(running.is_active());

        assert!(registry.evict(&done.id).await.unwrap());
        assert!(!done.is_active());
        // Second eviction is a no-op, history is still there
        assert!(!registry.evict(&done.id).await.unwrap());
        assert_eq!(
            registry.get(&done.id).await.unwrap().status(),
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn remove_keeps_running_jobs() {
        let registry = JobRegistry::new();
        let running = test_job("running");
        let done = test_job("done");
        registry.register(running.clone()).await.unwrap();
        registry.register(done.clone()).await.unwrap();
        finish(&done, JobStatus::Failed);

        assert!(!registry.remove(&running.id).await.unwrap());
        assert!(registry.remove(&done.id).await.unwrap());
        assert!(registry.get(&done.id).await.is_err());
        assert_eq!(registry.running_jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn sweep_evicts_then_removes_by_age() {
        let registry = JobRegistry::new();
        let running = test_job("running");
        let done = test_job("done");
        registry.register(running.clone()).await.unwrap();
        registry.register(done.clone()).await.unwrap();
        finish(&done, JobStatus::Completed);

        let policy = RetentionPolicy {
            active_window: Duration::from_secs(10),
            history_ttl: Duration::from_secs(100),
            max_history: 10,
            sweep_interval: Duration::from_secs(1),
        };
        let finished = done.outcome().unwrap().finished;

        let report = registry.sweep(&policy, finished + Duration::from_secs(1)).await;
        assert_eq!(report, SweepReport::default());
        assert!(done.is_active());

        let report = registry.sweep(&policy, finished + Duration::from_secs(11)).await;
        assert_eq!(report.evicted, 1);
        assert!(!done.is_active());
        assert_eq!(registry.len().await, 2);

        let report = registry.sweep(&policy, finished + Duration::from_secs(101)).await;
        assert_eq!(report.removed, 1);
        assert_eq!(registry.len().await, 1);
        assert!(registry.get(&running.id).await.is_ok());
    }

    #[tokio::test]
    async fn sweep_caps_history_dropping_oldest_first() {
        let registry = JobRegistry::new();
        let mut done = Vec::new();
        for i in 0..4 {
            let job = test_job(&i.to_string());
            registry.register(job.clone()).await.unwrap();
            finish(&job, JobStatus::Completed);
            done.push(job);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let running = test_job("running");
        registry.register(running.clone()).await.unwrap();

        let policy = RetentionPolicy {
            max_history: 2,
            ..Default::default()
        };
        let report = registry.sweep(&policy, Instant::now()).await;
        assert_eq!(report.removed, 2);
        assert!(registry.get(&done[0].id).await.is_err());
        assert!(registry.get(&done[1].id).await.is_err());
        assert!(registry.get(&done[2].id).await.is_ok());
        assert!(registry.get(&done[3].id).await.is_ok());
        assert!(registry.get(&running.id).await.is_ok());
    }
}
