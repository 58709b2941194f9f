//! # Enrichment Worker Server
//!
//! Standalone binary for the worker service. Configuration comes from the
//! environment (see `WorkerConfig`); the listen port from `--port`.
//!
//! ```bash
//! # Local development against the in-process queue and memory sink
//! ENVIRONMENT=local cargo run --bin enrich-worker -- --port 8080
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use enrich_shared::config::WorkerConfig;
use enrich_shared::logging;
use enrich_worker::web::{router, AppState};

#[derive(Debug, Parser)]
#[command(name = "enrich-worker", about = "Enrichment task worker service")]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_tracing();

    let args = Args::parse();

    info!("Starting Enrichment Worker...");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        "   Build Mode: {}",
        if cfg!(debug_assertions) {
            "Debug"
        } else {
            "Release"
        }
    );

    let config = WorkerConfig::from_env()
        .map_err(|e| format!("Failed to load configuration: {e}"))?;
    let state = AppState::bootstrap(config)
        .await
        .map_err(|e| format!("Failed to bootstrap worker: {e}"))?;
    let offload = state.offload.clone();

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Enrichment Worker started successfully!");
    info!("   Listening on: {addr}");
    info!("   Environment: {}", state.config.environment);
    info!("   Queue: {}", state.queue.provider_name());
    info!("   Press Ctrl+C to shutdown gracefully");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown signal received, draining offload pools...");
    match tokio::time::timeout(Duration::from_secs(30), offload.shutdown()).await {
        Ok(()) => info!("Offload pools drained"),
        Err(_) => error!("Offload drain timed out, forcing exit"),
    }

    info!("Enrichment Worker shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}
