use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::engine::ExecutionEngine;

/// Install a handler for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is
/// received. The HTTP server and the retention task watch this token.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        token_clone.cancel();
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGTERM handler, only Ctrl-C will stop the service");
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received SIGINT, initiating graceful shutdown");
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Received Ctrl-C, initiating graceful shutdown");
}

/// Once `token` fires, stop every job the engine is still running.
///
/// Resolves after all of them have been finalized, so the caller can exit
/// without leaving child processes behind.
pub async fn drain_on_shutdown(token: CancellationToken, engine: Arc<ExecutionEngine>) {
    token.cancelled().await;
    engine.shutdown().await;
    tracing::info!("All jobs stopped");
}
