//! certmint daemon - mints a private key and issuer-signed certificate per
//! identity, once, and serves it to every client that asks.

use anyhow::{Context, Result};
use certmint_daemon::{Cli, Daemon, Settings, ShutdownCoordinator};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::resolve(cli).context("Invalid configuration")?;
    tracing::debug!(?settings, "Resolved settings");

    let daemon = Daemon::start(&settings)
        .await
        .context("Failed to start daemon")?;
    let cache = daemon.cache().clone();

    let coordinator = ShutdownCoordinator::new();
    let signal_shutdown = coordinator.signal();
    let signal_task = tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown");
            }
        }
        coordinator.shutdown();
    });

    let summary = daemon
        .serve(signal_shutdown)
        .await
        .context("Listener stopped on a fatal accept error")?;
    signal_task.abort();

    let metrics = cache.metrics();
    tracing::info!(
        accepted = summary.accepted,
        completed = summary.completed,
        failed = summary.failed,
        identities = metrics.entries,
        generations = metrics.generations_succeeded,
        "Shutdown complete"
    );
    Ok(())
}
