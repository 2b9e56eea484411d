//! # Device-Facing Routes
//!
//! Every handler here is a straight shim: deserialize, call the
//! coordinator, serialize. The authenticate → operate → touch-last_seen
//! sequencing all lives in the engine.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use drophub_core::{Command, Message, MessageSeverity, SyncPackage};
use drophub_db::HeartbeatUpdate;
use drophub_engine::{CompletionAck, DeviceStatus, SyncAck};

use crate::error::ApiError;
use crate::routes::AppState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Credential carried as a query parameter on GET endpoints.
#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub status: &'static str,
    pub device_id: String,
    pub server_time: DateTime<Utc>,
}

/// Poll response: at most one command, or `null`.
#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub command: Option<Command>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteBody {
    pub token: String,
    #[serde(default)]
    pub result: Option<String>,
    /// Defaults to success; devices that can only say "done" stay simple.
    #[serde(default = "default_true")]
    pub success: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct MessageBody {
    pub token: String,
    pub kind: String,
    #[serde(default)]
    pub severity: Option<String>,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatBody {
    pub token: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub network_address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub status: &'static str,
    pub device_id: String,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct OutcomeBody {
    pub token: String,
    pub success: bool,
    #[serde(default)]
    pub detail: Option<String>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Connectivity check; counts as authenticated contact.
pub async fn ping(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<PingResponse>, ApiError> {
    let server_time = state
        .coordinator
        .heartbeat(&device_id, &query.token, HeartbeatUpdate::default())
        .await?;

    Ok(Json(PingResponse {
        status: "ok",
        device_id,
        server_time,
    }))
}

/// Poll for the next command.
pub async fn poll_command(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<PollResponse>, ApiError> {
    let command = state.coordinator.poll_command(&device_id, &query.token).await?;
    Ok(Json(PollResponse { command }))
}

/// Report a command outcome.
pub async fn complete_command(
    State(state): State<AppState>,
    Path((device_id, command_id)): Path<(String, String)>,
    Json(body): Json<CompleteBody>,
) -> Result<Json<CompletionAck>, ApiError> {
    let ack = state
        .coordinator
        .complete_command(
            &device_id,
            &body.token,
            &command_id,
            body.result.as_deref(),
            body.success,
        )
        .await?;
    Ok(Json(ack))
}

/// Submit a message/log line.
pub async fn submit_message(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(body): Json<MessageBody>,
) -> Result<Json<Message>, ApiError> {
    let severity = match body.severity.as_deref() {
        Some(raw) => raw
            .parse::<MessageSeverity>()
            .map_err(drophub_engine::HubError::from)?,
        None => MessageSeverity::Info,
    };

    let message = state
        .coordinator
        .submit_message(&device_id, &body.token, &body.kind, severity, &body.content)
        .await?;
    Ok(Json(message))
}

/// Heartbeat with optional metadata refresh.
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(body): Json<HeartbeatBody>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let update = HeartbeatUpdate {
        reported_status: body.status,
        network_address: body.network_address,
        firmware_version: body.firmware_version,
    };

    let server_time = state
        .coordinator
        .heartbeat(&device_id, &body.token, update)
        .await?;

    Ok(Json(HeartbeatResponse {
        status: "acknowledged",
        device_id,
        server_time,
    }))
}

/// Self-status: liveness, pending work, recent messages.
pub async fn status(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<DeviceStatus>, ApiError> {
    let status = state.coordinator.device_status(&device_id, &query.token).await?;
    Ok(Json(status))
}

/// List staged sync packages.
pub async fn list_packages(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Vec<SyncPackage>>, ApiError> {
    let packages = state
        .coordinator
        .list_sync_packages(&device_id, &query.token)
        .await?;
    Ok(Json(packages))
}

/// Report that a package's content was fetched.
pub async fn report_fetch(
    State(state): State<AppState>,
    Path((device_id, package_id)): Path<(String, String)>,
    Json(body): Json<TokenBody>,
) -> Result<Json<SyncAck>, ApiError> {
    let ack = state
        .coordinator
        .report_sync_fetch(&device_id, &body.token, &package_id)
        .await?;
    Ok(Json(ack))
}

/// Minimal body for endpoints that only need the credential.
#[derive(Debug, Deserialize)]
pub struct TokenBody {
    pub token: String,
}

/// Report a package deploy outcome.
pub async fn report_outcome(
    State(state): State<AppState>,
    Path((device_id, package_id)): Path<(String, String)>,
    Json(body): Json<OutcomeBody>,
) -> Result<Json<SyncAck>, ApiError> {
    let ack = state
        .coordinator
        .report_sync_outcome(
            &device_id,
            &body.token,
            &package_id,
            body.success,
            body.detail.as_deref(),
        )
        .await?;
    Ok(Json(ack))
}
