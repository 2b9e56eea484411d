//! # drophub-core: Pure Domain Logic for DropHub
//!
//! This crate is the **heart** of DropHub. It contains the domain model for
//! coordinating a fleet of intermittently-connected, pull-based edge devices,
//! expressed as pure types and functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        DropHub Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   hub-server (HTTP binary)                      │   │
//! │  │    device poll/complete/heartbeat  •  admin enqueue/stage       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  drophub-engine (coordinator)                   │   │
//! │  │    authenticate → operate → touch last_seen                     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ drophub-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ liveness  │  │ validation│  │   error   │  │   │
//! │  │   │  Device   │  │ classify()│  │   rules   │  │  taxonomy │  │   │
//! │  │   │  Command  │  │ thresholds│  │   checks  │  │           │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK READS • PURE FUNCTIONS       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  drophub-db (SQLite layer)                      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Device, Command, SyncPackage, etc.)
//! - [`liveness`] - Liveness classification as a pure function of `last_seen`
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation rules
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: callers pass `now` in; nothing here reads a clock
//! 2. **No Stored Flags**: liveness is always recomputed, never persisted
//! 3. **Explicit State Machines**: command and package lifecycles are enums
//!    with terminal-state guards, not loose strings
//! 4. **Explicit Errors**: all errors are typed, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod liveness;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use drophub_core::Command` instead of
// `use drophub_core::types::Command`

pub use error::ValidationError;
pub use liveness::{Liveness, LivenessThresholds};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum commands allowed to sit non-terminal in a single device queue.
///
/// ## Why a cap?
/// A device that never polls would otherwise accumulate commands without
/// bound. Admins hitting the cap is a signal the device is gone, not a
/// reason to buffer more.
pub const MAX_QUEUE_DEPTH: i64 = 100;

/// Maximum length of a command result payload, in bytes.
pub const MAX_RESULT_BYTES: usize = 64 * 1024;

/// Device class recorded when a registration does not specify one.
pub const DEFAULT_DEVICE_CLASS: &str = "esp8266";
