//! # Route Definitions
//!
//! ## Surface
//! ```text
//! Device-facing (device credential required on every call):
//!   GET  /device/{id}/ping
//!   GET  /device/{id}/command                   poll for next command
//!   POST /device/{id}/command/{cmd}/complete    report outcome
//!   POST /device/{id}/message
//!   POST /device/{id}/heartbeat
//!   GET  /device/{id}/status
//!   GET  /device/{id}/sync/packages
//!   POST /device/{id}/sync/{pkg}/fetched
//!   POST /device/{id}/sync/{pkg}/outcome
//!
//! Admin-facing (elevated trust, no device credential):
//!   GET  /admin/devices
//!   POST /admin/devices                         register / rotate token
//!   POST /admin/devices/{id}/revoke
//!   POST /admin/devices/{id}/command            enqueue
//!   GET  /admin/devices/{id}/history
//!   GET  /admin/sync-packages
//!   POST /admin/sync-packages                   stage
//!   GET  /admin/events
//!   GET  /admin/stats
//!
//! Infrastructure:
//!   GET  /health
//! ```

pub mod admin;
pub mod device;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use drophub_engine::DeviceCoordinator;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<DeviceCoordinator>,
}

/// Health check endpoint.
async fn health_handler() -> &'static str {
    "OK"
}

/// Builds the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Device-facing
        .route("/device/{device_id}/ping", get(device::ping))
        .route("/device/{device_id}/command", get(device::poll_command))
        .route(
            "/device/{device_id}/command/{command_id}/complete",
            post(device::complete_command),
        )
        .route("/device/{device_id}/message", post(device::submit_message))
        .route("/device/{device_id}/heartbeat", post(device::heartbeat))
        .route("/device/{device_id}/status", get(device::status))
        .route("/device/{device_id}/sync/packages", get(device::list_packages))
        .route(
            "/device/{device_id}/sync/{package_id}/fetched",
            post(device::report_fetch),
        )
        .route(
            "/device/{device_id}/sync/{package_id}/outcome",
            post(device::report_outcome),
        )
        // Admin-facing
        .route("/admin/devices", get(admin::list_devices).post(admin::register_device))
        .route("/admin/devices/{device_id}/revoke", post(admin::revoke_device))
        .route("/admin/devices/{device_id}/command", post(admin::enqueue_command))
        .route("/admin/devices/{device_id}/history", get(admin::device_history))
        .route(
            "/admin/sync-packages",
            get(admin::list_packages).post(admin::stage_package),
        )
        .route("/admin/events", get(admin::recent_events))
        .route("/admin/stats", get(admin::system_stats))
        // Infrastructure
        .route("/health", get(health_handler))
        .with_state(state)
}
