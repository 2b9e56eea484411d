//! # Engine Error Types
//!
//! The device-facing error taxonomy.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Hub Error Categories                              │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Authentication │  │    Not Found    │  │      Desync             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  UnknownDevice  │  │  UnknownCommand │  │  CommandNotDelivered    │ │
//! │  │  InvalidCred    │  │  UnknownPackage │  │  PackageNotFetched      │ │
//! │  │  RateLimited    │  │                 │  │  WrongDevice            │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │     Input       │  │  Configuration  │  │      Storage            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Validation     │  │  InvalidConfig  │  │  Storage (wraps         │ │
//! │  │  QueueFull      │  │  ConfigLoad     │  │  DbError, commits are   │ │
//! │  │                 │  │                 │  │  all-or-nothing)        │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Duplicate reports (`ALREADY_TERMINAL` situations) are deliberately NOT
//! in this taxonomy: devices retry blindly, so a duplicate is a success
//! with no side effect, reported through the operation's ack type instead.

use thiserror::Error;

use drophub_core::ValidationError;
use drophub_db::DbError;

/// Result type alias for engine operations.
pub type HubResult<T> = Result<T, HubError>;

/// The coordination engine error type.
///
/// Every variant is distinguishable so the HTTP layer can map "device
/// unknown" differently from "command already handled" - dashboards need
/// the difference.
#[derive(Debug, Error)]
pub enum HubError {
    // =========================================================================
    // Authentication
    // =========================================================================
    /// No registered, active device with this id.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// The presented token does not match the device's credential.
    /// Deliberately does NOT update last_seen.
    #[error("Invalid credential for device {0}")]
    InvalidCredential(String),

    /// The device exceeded its request budget.
    #[error("Too many requests from device {0}")]
    RateLimited(String),

    // =========================================================================
    // Not Found
    // =========================================================================
    /// No command with this id.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// No sync package with this id.
    #[error("Unknown sync package: {0}")]
    UnknownPackage(String),

    // =========================================================================
    // Desync
    // =========================================================================
    /// The command or package belongs to a different device than the
    /// caller.
    #[error("{subject} does not belong to device {device_id}")]
    WrongDevice { subject: String, device_id: String },

    /// A completion report arrived for a command the hub never delivered.
    /// Rejected rather than silently accepted, to catch device/hub
    /// desynchronization.
    #[error("Command {0} was never delivered; completion rejected")]
    CommandNotDelivered(String),

    /// An outcome report arrived for a package the device never reported
    /// fetching.
    #[error("Package {0} was never fetched; outcome rejected")]
    PackageNotFetched(String),

    // =========================================================================
    // Input
    // =========================================================================
    /// Input validation failed.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The device's queue is at capacity.
    #[error("Command queue for device {0} is full")]
    QueueFull(String),

    // =========================================================================
    // Configuration
    // =========================================================================
    /// Invalid hub configuration.
    #[error("Invalid hub configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load the config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Internal
    // =========================================================================
    /// An internal channel closed unexpectedly (sweeper shutdown path).
    #[error("Channel error: {0}")]
    ChannelError(String),

    // =========================================================================
    // Storage
    // =========================================================================
    /// Database failure. Operations never partially apply: either the
    /// state transition committed or prior state is untouched.
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = HubError::UnknownDevice("esp001".to_string());
        assert_eq!(err.to_string(), "Unknown device: esp001");

        let err = HubError::WrongDevice {
            subject: "Command c-1".to_string(),
            device_id: "esp002".to_string(),
        };
        assert_eq!(err.to_string(), "Command c-1 does not belong to device esp002");
    }
}
