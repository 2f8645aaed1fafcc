use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use workload_runner::api::{run_server, AppState};
use workload_runner::config::{EngineConfig, RetentionPolicy, ServerConfig};
use workload_runner::job::{CommandDescriptor, JobStatus};
use workload_runner::shutdown::{drain_on_shutdown, install_shutdown_handler};
use workload_runner::ExecutionEngine;

#[derive(Parser, Debug)]
#[command(name = "workload-runner")]
#[command(version)]
#[command(about = "Runs and supervises long-running benchmark and data-movement tools")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the HTTP service
    Serve(ServeArgs),

    /// Run a single command under the supervisor and print its final status
    Run(RunArgs),
}

// =============================================================================
// Engine Arguments (shared by serve and run)
// =============================================================================

#[derive(clap::Args, Debug)]
struct EngineArgs {
    /// Liveness poll period in milliseconds
    #[arg(long, default_value = "250")]
    poll_interval_ms: u64,

    /// Seconds between SIGTERM and SIGKILL when stopping a job
    #[arg(long, default_value = "5")]
    grace_period: u64,
}

impl EngineArgs {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_grace_period(Duration::from_secs(self.grace_period))
    }
}

// =============================================================================
// Serve Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port to listen on
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Path to the NoSQLBench 5 jar
    #[arg(long, default_value = "nb5.jar")]
    nb5_jar: PathBuf,

    /// Path to the DSBulk jar
    #[arg(long, default_value = "dsbulk-1.11.0.jar")]
    dsbulk_jar: PathBuf,

    /// Directory for materialized workload files (defaults to the system temp dir)
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Timeout in seconds for requests that do not specify one
    #[arg(long, default_value = "600")]
    default_timeout: u64,

    /// Seconds a finished job stays in the active view
    #[arg(long, default_value = "3600")]
    active_window: u64,

    /// Seconds a finished job is kept at all
    #[arg(long, default_value = "86400")]
    history_ttl: u64,

    /// Maximum number of finished jobs kept
    #[arg(long, default_value = "1000")]
    max_history: usize,

    #[command(flatten)]
    engine: EngineArgs,
}

// =============================================================================
// Run Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    /// Timeout in seconds (none by default)
    #[arg(long)]
    timeout: Option<u64>,

    /// Working directory for the command
    #[arg(long)]
    working_dir: Option<PathBuf>,

    #[command(flatten)]
    engine: EngineArgs,

    /// Program followed by its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let retention = RetentionPolicy {
        active_window: Duration::from_secs(args.active_window),
        history_ttl: Duration::from_secs(args.history_ttl),
        max_history: args.max_history,
        ..RetentionPolicy::default()
    };

    let mut config = ServerConfig::new(SocketAddr::new(args.host, args.port))
        .with_nb5_jar(args.nb5_jar)
        .with_dsbulk_jar(args.dsbulk_jar);
    if let Some(dir) = args.scratch_dir {
        config = config.with_scratch_dir(dir);
    }
    config.default_timeout = Duration::from_secs(args.default_timeout);
    config.engine = args.engine.engine_config().with_retention(retention);

    tracing::info!(
        listen_addr = %config.listen_addr,
        nb5_jar = %config.nb5_jar.display(),
        dsbulk_jar = %config.dsbulk_jar.display(),
        scratch_dir = %config.scratch_dir.display(),
        "Starting workload-runner"
    );
    if !config.nb5_jar.is_file() {
        tracing::warn!(path = %config.nb5_jar.display(), "NB5 jar not found, NB5 executions will be rejected");
    }

    let engine = Arc::new(ExecutionEngine::new(config.engine.clone()));
    let shutdown = install_shutdown_handler();

    let retention_engine = engine.clone();
    let retention_token = shutdown.clone();
    let retention = tokio::spawn(async move {
        retention_engine.run_retention(retention_token).await;
    });

    let drain = tokio::spawn(drain_on_shutdown(shutdown.clone(), engine.clone()));

    let addr = config.listen_addr;
    let state = AppState::new(engine.clone(), config);
    let served = run_server(addr, state, shutdown.clone()).await;

    // Covers the server failing on its own as well as a signal
    shutdown.cancel();
    let _ = retention.await;
    let _ = drain.await;
    served?;
    Ok(())
}

// =============================================================================
// Single Command Implementation
// =============================================================================

async fn run_once(args: RunArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let Some((program, rest)) = args.command.split_first() else {
        return Err("no command given".into());
    };
    let mut descriptor = CommandDescriptor::new(program).args(rest.iter().cloned());
    if let Some(dir) = args.working_dir {
        descriptor = descriptor.current_dir(dir);
    }

    let engine = ExecutionEngine::new(args.engine.engine_config());
    let id = engine
        .start(descriptor, args.timeout.map(Duration::from_secs))
        .await?;

    let view = tokio::select! {
        view = engine.wait(&id) => view?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(job_id = %id, "Interrupted, terminating job");
            engine.terminate(&id).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(view.status == JobStatus::Completed)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging();

    match args.command {
        Commands::Serve(serve_args) => run_serve(serve_args).await,
        Commands::Run(run_args) => {
            if !run_once(run_args).await? {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
