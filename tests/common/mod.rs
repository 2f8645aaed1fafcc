//! Shared helpers for engine integration tests.

#![allow(dead_code)]

use std::time::{Duration, Instant};

use workload_runner::config::EngineConfig;
use workload_runner::job::{CommandDescriptor, JobId, StatusView};
use workload_runner::ExecutionEngine;

/// Engine tuned for fast tests
pub fn test_engine() -> ExecutionEngine {
    ExecutionEngine::new(test_config())
}

pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_poll_interval(Duration::from_millis(20))
        .with_grace_period(Duration::from_millis(500))
}

/// `sh -c <script>`
pub fn shell(script: &str) -> CommandDescriptor {
    CommandDescriptor::new("sh").args(["-c", script])
}

/// Poll `get_status` until `done` holds or `within` elapses.
pub async fn wait_until<F>(
    engine: &ExecutionEngine,
    id: &JobId,
    within: Duration,
    done: F,
) -> StatusView
where
    F: Fn(&StatusView) -> bool,
{
    let deadline = Instant::now() + within;
    loop {
        let view = engine.get_status(id).await.expect("job exists");
        if done(&view) {
            return view;
        }
        assert!(
            Instant::now() < deadline,
            "condition not reached within {:?}, last status {:?}",
            within,
            view.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Start `script` and wait for its terminal view.
pub async fn run_to_end(engine: &ExecutionEngine, script: &str) -> StatusView {
    let id = engine.start(shell(script), None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), engine.wait(&id))
        .await
        .expect("job finished in time")
        .unwrap()
}

/// Whether a pid still names a live (non-zombie) process.
#[cfg(target_os = "linux")]
pub fn pid_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Err(_) => false,
        Ok(stat) => {
            // State follows the parenthesised command name
            let state = stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next());
            !matches!(state, Some('Z') | Some('X') | None)
        }
    }
}
