use std::io;
use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::error::{Result, RunnerError};
use crate::job::CommandDescriptor;

/// Spawns external commands with both output streams piped.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }

    /// Start `command` and return the live child.
    ///
    /// Fails synchronously with [`RunnerError::Launch`] when the executable is
    /// missing or not executable, the working directory does not exist, or
    /// the spawn call itself fails. Must be called from within a Tokio runtime.
    pub fn launch(&self, command: &CommandDescriptor) -> Result<Child> {
        let launch_err = |source: io::Error| RunnerError::Launch {
            program: command.program.display().to_string(),
            source,
        };

        check_executable(&command.program).map_err(launch_err)?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = command.working_dir {
            if !dir.is_dir() {
                return Err(launch_err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("working directory {} does not exist", dir.display()),
                )));
            }
            cmd.current_dir(dir);
        }

        // Own process group, so signals reach everything the tool forks
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(launch_err)?;
        tracing::info!(
            pid = ?child.id(),
            command = %command.display(),
            "Launched process"
        );
        Ok(child)
    }
}

/// Explicit paths are checked up front; bare names are resolved by the spawn
/// call through `PATH`.
fn check_executable(program: &Path) -> io::Result<()> {
    if program.as_os_str().is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty program path",
        ));
    }
    if program.components().count() <= 1 && !program.is_absolute() {
        return Ok(());
    }

    let meta = std::fs::metadata(program).map_err(|e| {
        io::Error::new(e.kind(), format!("{}: {}", program.display(), e))
    })?;
    if !meta.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", program.display()),
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is not executable", program.display()),
            ));
        }
    }
    Ok(())
}
