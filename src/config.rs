use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// How long finished jobs stay visible.
///
/// Terminal jobs move through two stages:
/// - After `active_window` they leave the active view (evicted)
/// - After `history_ttl` they are removed from the registry entirely
///
/// Independently of age, at most `max_history` terminal jobs are kept;
/// the ones that finished first are dropped first. Running jobs are never
/// touched by retention.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub active_window: Duration,
    pub history_ttl: Duration,
    pub max_history: usize,
    /// Period of the background retention sweep
    pub sweep_interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            active_window: Duration::from_secs(3600),
            history_ttl: Duration::from_secs(24 * 3600),
            max_history: 1000,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Tuning for the execution engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Supervisor liveness poll period
    pub poll_interval: Duration,
    /// Window between SIGTERM and SIGKILL
    pub grace_period: Duration,
    /// How long a SIGKILL may take before the job is marked as errored
    pub kill_wait: Duration,
    /// How long finalization waits for the output streams to close
    pub drain_timeout: Duration,
    pub retention: RetentionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            grace_period: Duration::from_secs(5),
            kill_wait: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(2),
            retention: RetentionPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Location of the NoSQLBench 5 jar
    pub nb5_jar: PathBuf,
    /// Location of the DSBulk jar
    pub dsbulk_jar: PathBuf,
    /// Directory for materialized workload files
    pub scratch_dir: PathBuf,
    /// Timeout applied when a request does not carry one
    pub default_timeout: Duration,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            nb5_jar: PathBuf::from("nb5.jar"),
            dsbulk_jar: PathBuf::from("dsbulk-1.11.0.jar"),
            scratch_dir: std::env::temp_dir(),
            default_timeout: Duration::from_secs(600),
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_nb5_jar(mut self, path: impl Into<PathBuf>) -> Self {
        self.nb5_jar = path.into();
        self
    }

    pub fn with_dsbulk_jar(mut self, path: impl Into<PathBuf>) -> Self {
        self.dsbulk_jar = path.into();
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }
}
