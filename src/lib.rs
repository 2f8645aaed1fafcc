pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod shutdown;
pub mod worker;
pub mod workload;

pub use engine::ExecutionEngine;
pub use error::{Result, RunnerError};
