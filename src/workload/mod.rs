//! Builders that turn tool-specific requests into launchable commands.
//!
//! Each tool implements [`Workload`]: a human readable command line for
//! display, and a [`PreparedLaunch`] with any scratch files it had to write.
//! Ownership of those files passes to the engine once the launch is handed
//! over.

pub mod dsbulk;
pub mod nb5;

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::job::CommandDescriptor;

pub use dsbulk::{DsbulkOperation, DsbulkWorkload};
pub use nb5::Nb5Workload;

/// A command ready to launch, together with the scratch files it needs.
#[derive(Debug, Clone)]
pub struct PreparedLaunch {
    pub descriptor: CommandDescriptor,
    pub temp_resources: Vec<PathBuf>,
    /// Tool-specific rendering of the command line
    pub display: String,
}

impl PreparedLaunch {
    pub fn new(descriptor: CommandDescriptor) -> Self {
        let display = descriptor.display();
        Self {
            descriptor,
            temp_resources: Vec::new(),
            display,
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = display.into();
        self
    }

    pub fn with_temp_resource(mut self, path: PathBuf) -> Self {
        self.temp_resources.push(path);
        self
    }
}

pub trait Workload {
    /// Command line as shown to users and written into scripts.
    fn display(&self) -> String;

    /// Validate inputs, write any scratch files under `scratch_dir` and build
    /// the command to launch.
    fn prepare(&self, scratch_dir: &Path) -> Result<PreparedLaunch>;
}
