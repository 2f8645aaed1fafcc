use std::io;
use std::process::ExitStatus;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use tokio::process::Child;
use tokio::sync::Mutex;

/// How often to re-check liveness while waiting for a signalled process.
const EXIT_POLL: Duration = Duration::from_millis(20);

/// Live handle to a spawned process.
///
/// The child sits behind a short-held lock so that liveness checks, signals
/// and the final release can come from different tasks. No lock is ever held
/// across a wait: exit is detected with non-blocking `try_wait` polls.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    child: Mutex<Option<Child>>,
    exit: OnceLock<ExitStatus>,
}

impl ProcessHandle {
    pub fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Mutex::new(Some(child)),
            exit: OnceLock::new(),
        }
    }

    /// A handle with no process behind it.
    #[cfg(test)]
    pub(crate) fn released() -> Self {
        Self {
            pid: None,
            child: Mutex::new(None),
            exit: OnceLock::new(),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status if the process has exited, reaping it on first observation.
    pub async fn try_exit(&self) -> io::Result<Option<ExitStatus>> {
        if let Some(status) = self.exit.get() {
            return Ok(Some(*status));
        }
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Ok(None);
        };
        match child.try_wait()? {
            Some(status) => {
                let _ = self.exit.set(status);
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    pub async fn is_alive(&self) -> bool {
        if self.exit.get().is_some() {
            return false;
        }
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            None => false,
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    let _ = self.exit.set(status);
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    tracing::warn!(pid = ?self.pid, error = %e, "Liveness check failed");
                    false
                }
            },
        }
    }

    /// Ask the process (and its process group) to exit.
    pub async fn signal_terminate(&self) -> io::Result<()> {
        #[cfg(unix)]
        {
            self.signal_group(nix::sys::signal::Signal::SIGTERM)
        }
        #[cfg(not(unix))]
        {
            self.force_kill().await
        }
    }

    /// Kill the process (and its process group) without giving it a chance to clean up.
    pub async fn force_kill(&self) -> io::Result<()> {
        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGKILL)?;

        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            if let Err(e) = child.start_kill() {
                // Already reaped children report InvalidInput
                if e.kind() != io::ErrorKind::InvalidInput {
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) -> io::Result<()> {
        match self.pid {
            Some(pid) if self.exit.get().is_none() => send_to_group(pid, signal),
            _ => Ok(()),
        }
    }

    /// SIGKILL whatever is left of the process group, even after the leader
    /// has exited. Descendants the command forked would otherwise outlive the
    /// job and keep its output pipes open.
    pub fn kill_group(&self) -> io::Result<()> {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            return send_to_group(pid, nix::sys::signal::Signal::SIGKILL);
        }
        Ok(())
    }

    /// Poll for exit for at most `within`.
    pub async fn wait_exit(&self, within: Duration) -> io::Result<Option<ExitStatus>> {
        let deadline = Instant::now() + within;
        loop {
            if let Some(status) = self.try_exit().await? {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(EXIT_POLL.min(deadline - now)).await;
        }
    }

    /// Graceful-then-forced stop.
    ///
    /// Sends SIGTERM, waits up to `grace`, then SIGKILLs and waits up to
    /// `kill_wait`. Fails with `TimedOut` if the process is still alive after that.
    pub async fn stop(&self, grace: Duration, kill_wait: Duration) -> io::Result<ExitStatus> {
        if let Some(status) = self.try_exit().await? {
            return Ok(status);
        }

        tracing::debug!(pid = ?self.pid, "Sending SIGTERM");
        self.signal_terminate().await?;
        if let Some(status) = self.wait_exit(grace).await? {
            return Ok(status);
        }

        tracing::warn!(pid = ?self.pid, grace_ms = grace.as_millis() as u64, "Grace period elapsed, force killing");
        self.force_kill().await?;
        match self.wait_exit(kill_wait).await? {
            Some(status) => Ok(status),
            None => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "process still alive after SIGKILL",
            )),
        }
    }

    /// Drop the child handle. Returns false if it was already released.
    pub async fn release(&self) -> bool {
        self.child.lock().await.take().is_some()
    }

    pub async fn is_released(&self) -> bool {
        self.child.lock().await.is_none()
    }
}

#[cfg(unix)]
fn send_to_group(pid: u32, signal: nix::sys::signal::Signal) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::from(e)),
    }
}
