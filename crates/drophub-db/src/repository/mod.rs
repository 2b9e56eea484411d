//! # Repository Module
//!
//! Repository implementations for database operations.
//!
//! ## The Repository Pattern
//! Each repository wraps the connection pool and owns the SQL for one
//! aggregate. All state mutation goes through these methods - never
//! through ad-hoc queries - so the compare-and-set and idempotency
//! invariants are enforced in exactly one place.
//!
//! ## Repositories
//! - [`device`] - Device registry (identity, last_seen, soft delete)
//! - [`command`] - Per-device command queue with CAS lifecycle transitions
//! - [`message`] - Append-only device message log
//! - [`sync_package`] - Staged packages + append-only sync history
//! - [`event`] - System-wide audit event log

pub mod command;
pub mod device;
pub mod event;
pub mod message;
pub mod sync_package;
