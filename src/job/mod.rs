//! Job entity and its read-only views.
//!
//! A [`Job`] is one invocation of an external command, tracked from launch
//! to terminal status. Its mutable parts are each guarded separately:
//!
//! - **Status**: [`StatusCell`], a lock-free one-shot claim plus a published outcome
//! - **Logs**: one [`LogBuffer`] per output stream
//! - **Process**: [`ProcessHandle`], released exactly once by the finalizer
//! - **Temp resources**: scratch files deleted exactly once by the finalizer

pub mod log;
pub mod registry;
pub mod status;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::worker::process::ProcessHandle;

pub use log::LogBuffer;
pub use registry::JobRegistry;
pub use status::{Outcome, StatusCell};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    TimedOut,
    Terminated,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    pub(crate) fn as_code(&self) -> u8 {
        match self {
            JobStatus::Running => 0,
            JobStatus::Completed => 1,
            JobStatus::Failed => 2,
            JobStatus::TimedOut => 3,
            JobStatus::Terminated => 4,
            JobStatus::Error => 5,
        }
    }

    /// Inverse of `as_code` for terminal statuses; `0` maps to `None`.
    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(JobStatus::Completed),
            2 => Some(JobStatus::Failed),
            3 => Some(JobStatus::TimedOut),
            4 => Some(JobStatus::Terminated),
            5 => Some(JobStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::TimedOut => write!(f, "timed_out"),
            JobStatus::Terminated => write!(f, "terminated"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// Executable, arguments and working directory of an external command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl CommandDescriptor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Single-line rendering for display and audit. Arguments containing
    /// whitespace are double-quoted.
    pub fn display(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().map(|a| {
                if a.is_empty() || a.chars().any(char::is_whitespace) {
                    format!("\"{}\"", a)
                } else {
                    a.clone()
                }
            }))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Full state of one job, as returned by `get_status` and `terminate`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub execution_id: JobId,
    pub status: JobStatus,
    pub is_running: bool,
    pub command: String,
    pub descriptor: CommandDescriptor,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub timeout_secs: Option<u64>,
}

/// Compact per-job entry returned by `list`.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub execution_id: JobId,
    pub status: JobStatus,
    pub is_running: bool,
    pub command: String,
    pub start_time: DateTime<Utc>,
    pub log_size: usize,
    pub active: bool,
}

pub struct Job {
    pub id: JobId,
    pub command: CommandDescriptor,
    /// Rendering reported by status and list
    pub display: String,
    pub start_time: DateTime<Utc>,
    pub timeout: Option<Duration>,
    started: Instant,
    status: StatusCell,
    pub stdout: LogBuffer,
    pub stderr: LogBuffer,
    process: ProcessHandle,
    temp_resources: Mutex<Vec<PathBuf>>,
    capture_tasks: Mutex<Vec<JoinHandle<()>>>,
    active: AtomicBool,
    /// Fired by whoever claims finalization, wakes the supervisor
    interrupt: CancellationToken,
    /// Fired once the outcome is published and resources are released
    done: CancellationToken,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("command", &self.display)
            .field("status", &self.status.get())
            .field("pid", &self.process.pid())
            .finish()
    }
}

impl Job {
    pub fn new(
        id: JobId,
        command: CommandDescriptor,
        timeout: Option<Duration>,
        process: ProcessHandle,
        temp_resources: Vec<PathBuf>,
    ) -> Self {
        Self {
            id,
            display: command.display(),
            command,
            start_time: Utc::now(),
            timeout,
            started: Instant::now(),
            status: StatusCell::new(),
            stdout: LogBuffer::new(),
            stderr: LogBuffer::new(),
            process,
            temp_resources: Mutex::new(temp_resources),
            capture_tasks: Mutex::new(Vec::new()),
            active: AtomicBool::new(true),
            interrupt: CancellationToken::new(),
            done: CancellationToken::new(),
        }
    }

    /// Replace the default rendering, e.g. with a tool-specific command line.
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = display.into();
        self
    }

    pub fn status(&self) -> JobStatus {
        self.status.get()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.status.outcome()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the OS process is alive right now, independent of bookkeeping.
    pub async fn is_running(&self) -> bool {
        self.process.is_alive().await
    }

    pub fn process(&self) -> &ProcessHandle {
        &self.process
    }

    /// Instant at which the job exceeds its timeout, if it has one. A timeout
    /// too large to represent never expires.
    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.and_then(|t| self.started.checked_add(t))
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Drop the job from the active view. Returns false if it already was.
    pub(crate) fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }

    /// Claim finalization with `intent` and wake the supervisor to carry it out.
    pub(crate) fn request_finalize(&self, intent: JobStatus) -> bool {
        let won = self.status.claim(intent);
        if won {
            self.interrupt.cancel();
        }
        won
    }

    pub(crate) fn status_cell(&self) -> &StatusCell {
        &self.status
    }

    pub(crate) fn interrupt_token(&self) -> &CancellationToken {
        &self.interrupt
    }

    pub(crate) fn mark_done(&self) {
        self.done.cancel();
    }

    /// Resolves once the job is terminal and its resources are released.
    pub async fn wait_finished(&self) {
        self.done.cancelled().await
    }

    pub(crate) async fn add_capture_task(&self, task: JoinHandle<()>) {
        self.capture_tasks.lock().await.push(task);
    }

    pub(crate) async fn take_capture_tasks(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.capture_tasks.lock().await)
    }

    pub(crate) async fn take_temp_resources(&self) -> Vec<PathBuf> {
        std::mem::take(&mut *self.temp_resources.lock().await)
    }

    pub async fn temp_resources(&self) -> Vec<PathBuf> {
        self.temp_resources.lock().await.clone()
    }

    /// Consistent snapshot of the job. The status is read before the logs, so
    /// a terminal status is always paired with the complete, frozen logs.
    pub async fn view(&self) -> StatusView {
        let outcome = self.status.outcome().cloned();
        let is_running = self.is_running().await;
        StatusView {
            execution_id: self.id,
            status: outcome
                .as_ref()
                .map(|o| o.status)
                .unwrap_or(JobStatus::Running),
            is_running,
            command: self.display.clone(),
            descriptor: self.command.clone(),
            stdout: self.stdout.snapshot().await,
            stderr: self.stderr.snapshot().await,
            start_time: self.start_time,
            finished_at: outcome.as_ref().map(|o| o.finished_at),
            exit_code: outcome.and_then(|o| o.exit_code),
            timeout_secs: self.timeout.map(|t| t.as_secs()),
        }
    }

    pub async fn summary(&self) -> JobSummary {
        let status = self.status.get();
        JobSummary {
            execution_id: self.id,
            status,
            is_running: self.is_running().await,
            command: self.display.clone(),
            start_time: self.start_time,
            log_size: self.stdout.len().await + self.stderr.len().await,
            active: self.is_active(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_round_trips_through_string() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn job_status_display_and_terminality() {
        assert_eq!(JobStatus::Running.to_string(), "running");
        assert_eq!(JobStatus::TimedOut.to_string(), "timed_out");
        assert_eq!(JobStatus::Terminated.to_string(), "terminated");
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Error.is_terminal());
    }

    #[test]
    fn job_status_serializes_snake_case() {
        let json = serde_json::to_string(&JobStatus::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
    }

    #[test]
    fn status_codes_map_back() {
        for status in [
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::TimedOut,
            JobStatus::Terminated,
            JobStatus::Error,
        ] {
            assert_eq!(JobStatus::from_code(status.as_code()), Some(status));
        }
        assert_eq!(JobStatus::from_code(JobStatus::Running.as_code()), None);
    }

    fn bare_job(timeout: Option<Duration>) -> Job {
        Job::new(
            JobId::new(),
            CommandDescriptor::new("true"),
            timeout,
            ProcessHandle::released(),
            Vec::new(),
        )
    }

    #[test]
    fn deadline_follows_timeout() {
        assert!(bare_job(None).deadline().is_none());

        let job = bare_job(Some(Duration::from_secs(5)));
        let deadline = job.deadline().unwrap();
        assert!(deadline > Instant::now());
        assert!(deadline <= Instant::now() + Duration::from_secs(5));
    }

    #[test]
    fn unrepresentable_timeout_never_expires() {
        let job = bare_job(Some(Duration::from_secs(u64::MAX)));
        assert!(job.deadline().is_none());
        assert_eq!(job.timeout, Some(Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn display_defaults_to_descriptor_rendering() {
        let job = bare_job(None);
        assert_eq!(job.display, "true");

        let job = bare_job(None).with_display("java \\\n  -jar nb5.jar");
        assert_eq!(job.display, "java \\\n  -jar nb5.jar");
        assert_eq!(job.command.display(), "true");
    }

    #[test]
    fn command_descriptor_display_quotes_whitespace() {
        let cmd = CommandDescriptor::new("java")
            .args(["-jar", "/opt/nb5.jar"])
            .arg("/tmp/my workload.yaml")
            .arg("host=10.0.0.1")
            .current_dir("/tmp");
        assert_eq!(
            cmd.display(),
            "java -jar /opt/nb5.jar \"/tmp/my workload.yaml\" host=10.0.0.1"
        );
        assert_eq!(cmd.working_dir, Some(PathBuf::from("/tmp")));
    }
}
