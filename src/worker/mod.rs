//! Execution of external commands.
//!
//! - [`launcher`]: spawns a command with piped output streams
//! - [`process`]: live handle with liveness checks and graceful-then-forced stop
//! - [`capture`]: one task per output stream, draining lines into the job log
//! - [`supervisor`]: one task per job, enforcing the timeout and finalizing
//!
//! # Execution Flow
//!
//! 1. [`ProcessLauncher::launch`] spawns the process (failures are reported
//!    before any job exists)
//! 2. Two capture tasks drain stdout and stderr concurrently
//! 3. The [`Supervisor`] polls liveness until the process exits, the timeout
//!    expires, or a termination is claimed
//! 4. The supervisor stops the process if needed, drains the streams,
//!    releases resources and publishes the terminal status

pub mod capture;
pub mod launcher;
pub mod process;
pub mod supervisor;

pub use capture::{spawn_capture, StreamKind};
pub use launcher::ProcessLauncher;
pub use process::ProcessHandle;
pub use supervisor::Supervisor;
