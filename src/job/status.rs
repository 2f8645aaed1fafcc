//! One-shot finalization guard for a job.
//!
//! Finalization is split in two steps:
//!
//! 1. **Claim**: the first actor to decide how the job ends (natural exit,
//!    timeout, manual terminate, internal error) wins a compare-and-set on
//!    the claim slot. Every later claim fails and must not touch the job.
//! 2. **Publish**: once the claimed outcome has been carried out (process
//!    stopped, logs drained), the terminal [`Outcome`] is published exactly
//!    once. Readers see `Running` until then, and the frozen outcome after.
//!
//! The published status may differ from the claim only when the claim could
//! not be honoured (a process that survives SIGKILL degrades to `Error`).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::job::JobStatus;

const UNCLAIMED: u8 = 0;

/// Terminal facts about a job, published once.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub finished_at: DateTime<Utc>,
    pub finished: Instant,
}

#[derive(Debug, Default)]
pub struct StatusCell {
    claim: AtomicU8,
    outcome: OnceLock<Outcome>,
}

impl StatusCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to become the single finalizer of this job with the given intent.
    ///
    /// Returns false if another actor already claimed it. `Running` is not a
    /// valid intent and is always rejected.
    pub fn claim(&self, intent: JobStatus) -> bool {
        if !intent.is_terminal() {
            return false;
        }
        self.claim
            .compare_exchange(
                UNCLAIMED,
                intent.as_code(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// The intent of whoever won the claim, if anyone has.
    pub fn claimed(&self) -> Option<JobStatus> {
        JobStatus::from_code(self.claim.load(Ordering::Acquire))
    }

    /// Publish the terminal outcome. Returns false if one was already published.
    pub fn publish(&self, status: JobStatus, exit_code: Option<i32>) -> bool {
        debug_assert!(status.is_terminal());
        self.outcome
            .set(Outcome {
                status,
                exit_code,
                finished_at: Utc::now(),
                finished: Instant::now(),
            })
            .is_ok()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.get()
    }

    /// Current externally visible status.
    pub fn get(&self) -> JobStatus {
        self.outcome
            .get()
            .map(|o| o.status)
            .unwrap_or(JobStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_running_and_unclaimed() {
        let cell = StatusCell::new();
        assert_eq!(cell.get(), JobStatus::Running);
        assert!(cell.claimed().is_none());
        assert!(!cell.is_terminal());
    }

    #[test]
    fn first_claim_wins() {
        let cell = StatusCell::new();
        assert!(cell.claim(JobStatus::TimedOut));
        assert!(!cell.claim(JobStatus::Terminated));
        assert!(!cell.claim(JobStatus::Completed));
        assert_eq!(cell.claimed(), Some(JobStatus::TimedOut));
        // Claiming alone does not change the visible status
        assert_eq!(cell.get(), JobStatus::Running);
    }

    #[test]
    fn running_is_not_a_valid_claim() {
        let cell = StatusCell::new();
        assert!(!cell.claim(JobStatus::Running));
        assert!(cell.claimed().is_none());
    }

    #[test]
    fn publish_happens_once() {
        let cell = StatusCell::new();
        assert!(cell.claim(JobStatus::Failed));
        assert!(cell.publish(JobStatus::Failed, Some(3)));
        assert!(!cell.publish(JobStatus::Completed, Some(0)));

        let outcome = cell.outcome().unwrap();
        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(cell.get(), JobStatus::Failed);
        assert!(cell.is_terminal());
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        let cell = Arc::new(StatusCell::new());
        let intents = [
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::TimedOut,
            JobStatus::Terminated,
            JobStatus::Error,
        ];

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let cell = cell.clone();
                let intent = intents[i % intents.len()];
                std::thread::spawn(move || cell.claim(intent))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(cell.claimed().is_some());
    }
}
