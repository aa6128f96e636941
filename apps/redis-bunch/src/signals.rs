//! Waiting for the operator to end a `run`.

use anyhow::{Context, Result};
use tokio::signal;

/// Blocks until Ctrl+C or SIGTERM arrives and returns the signal name.
///
/// # Errors
/// Returns an error if a signal handler cannot be installed.
pub async fn wait_for_shutdown() -> Result<&'static str> {
    let received = tokio::select! {
        result = signal::ctrl_c() => result.map(|()| "SIGINT").context("Ctrl+C handler failed")?,
        result = wait_sigterm() => result?,
    };
    tracing::info!(signal = received, "shutdown signal received, stopping topology");
    Ok(received)
}

#[cfg(unix)]
async fn wait_sigterm() -> Result<&'static str> {
    let mut handler = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;
    handler.recv().await;
    Ok("SIGTERM")
}

#[cfg(not(unix))]
async fn wait_sigterm() -> Result<&'static str> {
    std::future::pending::<Result<&'static str>>().await
}
