//! # Admin-Facing Routes
//!
//! Elevated trust, no device credential. Admin transport authentication
//! (reverse proxy, mTLS, VPN) is deployment-specific and out of scope
//! here - these routes must never be exposed raw to the device network.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use drophub_core::{Command, EventLogEntry, SyncPackage, SystemStats};
use drophub_engine::{DeviceHistory, DeviceSummary, PackageSpec, RegisteredDevice};

use crate::error::ApiError;
use crate::routes::AppState;

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ListDevicesQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub device_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueBody {
    pub kind: String,
    #[serde(default)]
    pub args: Option<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub ttl_secs: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub status: &'static str,
    pub device_id: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// List devices with computed liveness.
pub async fn list_devices(
    State(state): State<AppState>,
    Query(query): Query<ListDevicesQuery>,
) -> Result<Json<Vec<DeviceSummary>>, ApiError> {
    let devices = state.coordinator.list_devices(query.include_inactive).await?;
    Ok(Json(devices))
}

/// Register a device (or rotate an existing credential).
///
/// The response is the only place the plaintext token ever appears.
pub async fn register_device(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<Json<RegisteredDevice>, ApiError> {
    let registered = state
        .coordinator
        .register_device(&body.device_id, body.name.as_deref(), body.class.as_deref())
        .await?;
    Ok(Json(registered))
}

/// Deregister a device and revoke its credential.
pub async fn revoke_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<RevokeResponse>, ApiError> {
    state.coordinator.revoke_device(&device_id).await?;
    Ok(Json(RevokeResponse {
        status: "revoked",
        device_id,
    }))
}

/// Enqueue a command for a device.
pub async fn enqueue_command(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(body): Json<EnqueueBody>,
) -> Result<Json<Command>, ApiError> {
    let command = state
        .coordinator
        .enqueue_command(
            &device_id,
            &body.kind,
            body.args.as_deref(),
            body.priority,
            body.ttl_secs,
        )
        .await?;
    Ok(Json(command))
}

/// Full history for one device: commands, messages, sync events.
pub async fn device_history(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<DeviceHistory>, ApiError> {
    let history = state.coordinator.device_history(&device_id, query.limit).await?;
    Ok(Json(history))
}

/// Stage a sync package.
pub async fn stage_package(
    State(state): State<AppState>,
    Json(spec): Json<PackageSpec>,
) -> Result<Json<SyncPackage>, ApiError> {
    let package = state.coordinator.stage_package(&spec).await?;
    Ok(Json(package))
}

/// List packages, newest first.
pub async fn list_packages(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<SyncPackage>>, ApiError> {
    let packages = state.coordinator.list_packages(query.limit).await?;
    Ok(Json(packages))
}

/// Recent audit events.
pub async fn recent_events(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<EventLogEntry>>, ApiError> {
    let events = state.coordinator.recent_events(query.limit).await?;
    Ok(Json(events))
}

/// Fleet-wide counters.
pub async fn system_stats(
    State(state): State<AppState>,
) -> Result<Json<SystemStats>, ApiError> {
    let stats = state.coordinator.system_stats().await?;
    Ok(Json(stats))
}
