use thiserror::Error;

use crate::job::JobId;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Invalid job id: {0}")]
    InvalidId(String),

    #[error("Duplicate job id: {0}")]
    DuplicateId(JobId),

    #[error("Invalid workload: {0}")]
    InvalidWorkload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
