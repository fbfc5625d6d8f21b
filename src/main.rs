//! twinport: a framed message-relay server with a plain-text fallback
//!
//! One listening port serves two protocols:
//! - A length-framed binary protocol for queries (time, name, roster) and
//!   relaying messages between connected clients
//! - Plain-text `GET`/`POST` requests, answered with a fixed reply
//!
//! Features:
//! - Protocol detection on the first bytes of each connection
//! - Best-effort client-to-client message relay
//! - Graceful shutdown on SIGINT/SIGTERM with a bounded grace period
//! - Configuration via CLI arguments or TOML file

mod config;
mod error;
mod protocols;
mod reader;
mod registry;
mod server;
mod session;

use config::Config;
use server::Server;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        max_connections = config.max_connections,
        max_body_size = ?config.max_body_size,
        shutdown_grace_secs = config.shutdown_grace.as_secs(),
        "Starting twinport server"
    );

    let server = Server::bind(&config)?;
    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    server.run(shutdown).await?;
    info!("Server shutdown complete");
    Ok(())
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}
