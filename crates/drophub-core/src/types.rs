//! # Domain Types
//!
//! Core domain types used throughout DropHub.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     Device      │   │     Command     │   │   SyncPackage   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  id (UUID)      │       │
//! │  │  device_id      │   │  seq (per-dev)  │   │  target_device  │       │
//! │  │  token_hash     │   │  priority       │   │  checksum/size  │       │
//! │  │  last_seen      │   │  state machine  │   │  status machine │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  CommandState   │   │  PackageStatus  │   │     Message     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  SyncHistory    │       │
//! │  │  Queued         │   │  Staged         │   │  EventLogEntry  │       │
//! │  │  Delivered      │   │  Fetched        │   │  (append-only)  │       │
//! │  │  Completed ▪    │   │  Acknowledged ▪ │   └─────────────────┘       │
//! │  │  Failed    ▪    │   │  Failed      ▪  │      ▪ = terminal           │
//! │  │  Expired   ▪    │   └─────────────────┘                              │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 - immutable, used for database relations
//! - Business ID where one exists: `device_id` is the stable identity a
//!   device presents on the wire; it never changes once registered

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Device
// =============================================================================

/// A registered edge device.
///
/// The device row carries identity and observed metadata only. Whether the
/// device is "online" is never stored here - see [`crate::liveness`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Device {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Stable wire identity. Unique, immutable once registered.
    pub device_id: String,

    /// Display name shown on dashboards.
    pub name: String,

    /// Device class ("esp8266", "esp32", "rpi-zero", ...). Free-form.
    pub device_class: String,

    /// Argon2 PHC string of the device's credential.
    /// The plaintext token exists only in the registration response.
    pub token_hash: String,

    /// Last successfully authenticated contact. `None` = never seen.
    pub last_seen: Option<DateTime<Utc>>,

    /// Last status string the device reported about itself ("ok",
    /// "low-battery", ...). Informational only.
    pub reported_status: Option<String>,

    /// Network address observed in the last heartbeat.
    pub network_address: Option<String>,

    /// Firmware version reported in the last heartbeat.
    pub firmware_version: Option<String>,

    /// Free-form metadata blob (JSON), admin-editable.
    pub metadata: Option<String>,

    /// When the device was registered.
    pub created_at: DateTime<Utc>,

    /// Soft-delete flag. Deregistration flips this; rows are never removed.
    pub is_active: bool,
}

// =============================================================================
// Command State
// =============================================================================

/// The lifecycle state of a [`Command`].
///
/// ## State Machine
/// ```text
/// QUEUED ──► DELIVERED ──► COMPLETED
///    │            │    └──► FAILED
///    │            └───────► EXPIRED   (TTL elapsed before completion,
///    │                                 policy-gated)
///    └──────────────────────► EXPIRED (TTL elapsed before delivery)
/// ```
/// `Completed`, `Failed` and `Expired` are terminal and immutable
/// thereafter. The transitions are enforced in the database with
/// compare-and-set updates, never by overwriting a freshly-read value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    /// Enqueued, not yet handed to the device.
    Queued,
    /// Handed out in a poll response; awaiting the device's report.
    Delivered,
    /// Device reported success.
    Completed,
    /// Device reported failure.
    Failed,
    /// TTL elapsed before a terminal report arrived.
    Expired,
}

impl CommandState {
    /// Returns true for states with no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandState::Completed | CommandState::Failed | CommandState::Expired
        )
    }
}

impl std::fmt::Display for CommandState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandState::Queued => write!(f, "queued"),
            CommandState::Delivered => write!(f, "delivered"),
            CommandState::Completed => write!(f, "completed"),
            CommandState::Failed => write!(f, "failed"),
            CommandState::Expired => write!(f, "expired"),
        }
    }
}

// =============================================================================
// Command
// =============================================================================

/// A single instruction targeted at one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Command {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Owning device's wire identity.
    pub device_id: String,

    /// Per-device monotonic sequence number. Assigned atomically at
    /// enqueue; defines delivery order within a priority level.
    pub seq: i64,

    /// Opaque instruction kind ("reboot", "set-interval", ...).
    pub kind: String,

    /// Optional structured arguments (JSON).
    pub args: Option<String>,

    /// Dispatch priority. Higher goes first; ties break on `seq`.
    pub priority: i64,

    /// Current lifecycle state.
    pub state: CommandState,

    pub created_at: DateTime<Utc>,

    /// Set when the command is handed out in a poll response.
    pub delivered_at: Option<DateTime<Utc>>,

    /// Set when the device reports completion or failure.
    pub completed_at: Option<DateTime<Utc>>,

    /// Result payload from the device, if any.
    pub result: Option<String>,

    /// TTL deadline. `None` = never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Command {
    /// Whether the TTL deadline has elapsed at `now`.
    ///
    /// A terminal command is never "expired" in this sense - expiry only
    /// has meaning for commands that could still move.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        !self.state.is_terminal()
            && self.expires_at.map(|deadline| deadline <= now).unwrap_or(false)
    }
}

// =============================================================================
// Message Severity
// =============================================================================

/// Severity of a device-originated message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum MessageSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl MessageSeverity {
    /// Severities that get escalated into the system event log.
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            MessageSeverity::Warning | MessageSeverity::Error | MessageSeverity::Critical
        )
    }
}

impl Default for MessageSeverity {
    fn default() -> Self {
        MessageSeverity::Info
    }
}

impl std::fmt::Display for MessageSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageSeverity::Debug => write!(f, "debug"),
            MessageSeverity::Info => write!(f, "info"),
            MessageSeverity::Warning => write!(f, "warning"),
            MessageSeverity::Error => write!(f, "error"),
            MessageSeverity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for MessageSeverity {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(MessageSeverity::Debug),
            "info" => Ok(MessageSeverity::Info),
            "warning" | "warn" => Ok(MessageSeverity::Warning),
            "error" => Ok(MessageSeverity::Error),
            "critical" => Ok(MessageSeverity::Critical),
            other => Err(crate::error::ValidationError::NotAllowed {
                field: "severity".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

// =============================================================================
// Message
// =============================================================================

/// A device-originated message or log line. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Message {
    pub id: String,
    pub device_id: String,
    /// Message kind: "status", "error", "ack", "log", "diagnostic".
    pub kind: String,
    pub severity: MessageSeverity,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Sync Package Status
// =============================================================================

/// The lifecycle status of a [`SyncPackage`].
///
/// Monotonic: `staged → fetched → acknowledged | failed`. There is no
/// back-transition out of a terminal status; a package stuck in `fetched`
/// past the sync window is forced to `failed` by the expiry sweep, never
/// silently deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    /// Staged by an admin, not yet fetched by the device.
    Staged,
    /// Device reported fetching the content.
    Fetched,
    /// Device reported a successful deploy.
    Acknowledged,
    /// Device reported failure, or the sync window elapsed.
    Failed,
}

impl PackageStatus {
    /// Returns true for statuses with no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PackageStatus::Acknowledged | PackageStatus::Failed)
    }
}

impl std::fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageStatus::Staged => write!(f, "staged"),
            PackageStatus::Fetched => write!(f, "fetched"),
            PackageStatus::Acknowledged => write!(f, "acknowledged"),
            PackageStatus::Failed => write!(f, "failed"),
        }
    }
}

// =============================================================================
// Sync Package
// =============================================================================

/// A unit of content staged for one device to fetch and acknowledge.
///
/// The hub only bookkeeps location, checksum and size - actual byte
/// transfer happens out of band and is not this system's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SyncPackage {
    /// Unique identifier (UUID v4). Stable for the package's lifetime.
    pub id: String,

    /// Human-readable package name.
    pub name: String,

    /// Wire identity of the device this package targets.
    pub target_device_id: String,

    /// Package kind: "firmware", "config", "data", "script".
    pub kind: String,

    /// Where the device can retrieve the content from.
    pub content_path: String,

    /// Content checksum (hex SHA-256), when known.
    pub checksum: Option<String>,

    /// Content size in bytes.
    pub size_bytes: i64,

    pub status: PackageStatus,

    pub created_at: DateTime<Utc>,

    /// Set on the first fetch report.
    pub fetched_at: Option<DateTime<Utc>>,

    /// Set when the package reaches a terminal status.
    pub resolved_at: Option<DateTime<Utc>>,

    pub description: Option<String>,
}

// =============================================================================
// Sync History
// =============================================================================

/// The kind of event recorded in a [`SyncHistoryRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum SyncEvent {
    /// Device reported fetching the package content.
    Fetch,
    /// Device reported a successful deploy.
    Acknowledge,
    /// Device reported a failed deploy.
    Failure,
    /// The sync window elapsed; the sweep failed the package out.
    Expiry,
}

impl std::fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncEvent::Fetch => write!(f, "fetch"),
            SyncEvent::Acknowledge => write!(f, "acknowledge"),
            SyncEvent::Failure => write!(f, "failure"),
            SyncEvent::Expiry => write!(f, "expiry"),
        }
    }
}

/// Append-only record of a sync event, tied to a device and a package.
///
/// History reconstructs what happened without mutating the package, and it
/// survives device deregistration for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SyncHistoryRecord {
    pub id: String,
    pub device_id: String,
    pub package_id: String,
    pub event: SyncEvent,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Event Log
// =============================================================================

/// A system-wide audit event. Append-only.
///
/// Registrations, revocations, deliveries, escalated device alerts and
/// sweep results all land here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct EventLogEntry {
    pub id: String,
    /// Event type: "device_registered", "command_delivered", ...
    pub event_type: String,
    /// Origin: a device id, "admin", or "system".
    pub source: String,
    pub message: String,
    pub severity: MessageSeverity,
    /// Optional structured context (JSON).
    pub data: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// System Stats
// =============================================================================

/// Fleet-wide counters for the admin stats endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStats {
    /// Registered devices, active or not.
    pub devices_total: i64,
    /// Devices not deregistered.
    pub devices_active: i64,
    /// Active devices currently classified online.
    pub devices_online: i64,
    /// Commands sitting in `queued`.
    pub commands_pending: i64,
    /// Commands sitting in `delivered`.
    pub commands_in_flight: i64,
    /// Total device messages retained.
    pub messages_total: i64,
    /// Packages not yet terminal.
    pub packages_pending: i64,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_terminal_command_states() {
        assert!(!CommandState::Queued.is_terminal());
        assert!(!CommandState::Delivered.is_terminal());
        assert!(CommandState::Completed.is_terminal());
        assert!(CommandState::Failed.is_terminal());
        assert!(CommandState::Expired.is_terminal());
    }

    #[test]
    fn test_terminal_package_statuses() {
        assert!(!PackageStatus::Staged.is_terminal());
        assert!(!PackageStatus::Fetched.is_terminal());
        assert!(PackageStatus::Acknowledged.is_terminal());
        assert!(PackageStatus::Failed.is_terminal());
    }

    #[test]
    fn test_severity_parsing() {
        assert_eq!("warn".parse::<MessageSeverity>().unwrap(), MessageSeverity::Warning);
        assert_eq!("CRITICAL".parse::<MessageSeverity>().unwrap(), MessageSeverity::Critical);
        assert!("loud".parse::<MessageSeverity>().is_err());
    }

    #[test]
    fn test_severity_alert_threshold() {
        assert!(!MessageSeverity::Info.is_alert());
        assert!(MessageSeverity::Warning.is_alert());
        assert!(MessageSeverity::Critical.is_alert());
    }

    #[test]
    fn test_command_deadline() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let cmd = Command {
            id: "c1".to_string(),
            device_id: "esp001".to_string(),
            seq: 1,
            kind: "reboot".to_string(),
            args: None,
            priority: 0,
            state: CommandState::Queued,
            created_at: t0,
            delivered_at: None,
            completed_at: None,
            result: None,
            expires_at: Some(t0 + chrono::Duration::seconds(60)),
        };

        assert!(!cmd.is_past_deadline(t0 + chrono::Duration::seconds(59)));
        assert!(cmd.is_past_deadline(t0 + chrono::Duration::seconds(60)));

        // Terminal commands never report as past deadline
        let done = Command {
            state: CommandState::Completed,
            ..cmd
        };
        assert!(!done.is_past_deadline(t0 + chrono::Duration::seconds(120)));
    }
}
