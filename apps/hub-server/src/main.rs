//! # DropHub Server
//!
//! HTTP server for the DropHub device coordination engine.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         hub-server                                      │
//! │                                                                         │
//! │  edge devices ──► HTTP (poll/report) ──► DeviceCoordinator ──► SQLite  │
//! │  admin tools  ──► HTTP (enqueue/stage) ──┘        │                     │
//! │                                                   ▼                     │
//! │                                            ExpirySweeper               │
//! │                                            (background task)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Devices are purely pull-based; the server never opens a connection to
//! a device and never holds one open awaiting device action.

mod error;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use drophub_db::{Database, DbConfig};
use drophub_engine::{DeviceCoordinator, ExpirySweeper, HubConfig};

use crate::routes::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing; RUST_LOG overrides, info is the floor
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting DropHub server...");

    // Load configuration (optional `--config <path>` argument)
    let config_path = parse_config_arg();
    let config = HubConfig::load(config_path.as_deref())?;
    info!(
        db = %config.storage.database_path.display(),
        bind = %config.server.bind_address(),
        "Configuration loaded"
    );

    // Connect to the database (runs migrations)
    let db = Database::new(DbConfig::new(&config.storage.database_path)).await?;
    info!("Database ready");

    // Build the coordination engine
    let sweep_interval = Duration::from_secs(config.queue.sweep_interval_secs);
    let bind_address = config.server.bind_address();
    let coordinator = Arc::new(DeviceCoordinator::new(db.clone(), config)?);

    // Spawn the expiry sweeper
    let (sweeper, sweeper_handle) = ExpirySweeper::new(coordinator.clone(), sweep_interval);
    tokio::spawn(sweeper.run());

    // Serve
    let app = routes::router(AppState { coordinator });
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(addr = %bind_address, "Hub server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Orderly teardown
    info!("Shutting down");
    sweeper_handle.shutdown().await.ok();
    db.close().await;

    Ok(())
}

/// Extracts `--config <path>` from the command line, if present.
fn parse_config_arg() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

/// Resolves when the process receives a termination signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Termination signal received");
}
