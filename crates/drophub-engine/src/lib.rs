//! # drophub-engine: Coordination Engine for DropHub
//!
//! This crate turns the storage layer into the coordination contract the
//! rest of the system relies on: every device-facing and admin-facing
//! operation enters through [`DeviceCoordinator`], which sequences
//! rate limiting, authentication, the operation itself, and the
//! `last_seen` update.
//!
//! ## Module Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        drophub-engine                                   │
//! │                                                                         │
//! │  coordinator ── the facade; the ONLY mutation path for device state    │
//! │  credentials ── argon2 token hashing + constant-time verification      │
//! │  rate_limit ─── per-device sliding-window budget                       │
//! │  sweeper ────── background TTL/retention pass (same CAS as live ops)   │
//! │  config ─────── TOML + env + defaults                                  │
//! │  error ──────── the device-facing taxonomy                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod rate_limit;
pub mod sweeper;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::HubConfig;
pub use coordinator::{
    CompletionAck, DeviceCoordinator, DeviceHistory, DeviceStatus, DeviceSummary, PackageSpec,
    RegisteredDevice, SweepReport, SyncAck,
};
pub use credentials::CredentialStore;
pub use error::{HubError, HubResult};
pub use rate_limit::RateLimiter;
pub use sweeper::{ExpirySweeper, SweeperHandle};
