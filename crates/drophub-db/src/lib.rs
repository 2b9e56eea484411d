//! # drophub-db: Database Layer for DropHub
//!
//! This crate provides database access for the DropHub coordination hub.
//! It uses SQLite for local storage with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        DropHub Data Flow                                │
//! │                                                                         │
//! │  Coordinator operation (poll_command)                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     drophub-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │ (command.rs,  │    │  (embedded)  │  │   │
//! │  │   │               │    │  device.rs..) │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ CAS updates   │    │ 001_init.sql │  │   │
//! │  │   │ WAL mode      │    │ transactions  │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database file (survives process restart)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## The CAS Discipline
//!
//! Devices retry blindly and poll concurrently, so every lifecycle
//! transition here is written as
//! `UPDATE ... SET <new state> WHERE id = ? AND <expected current state>`
//! and classified from `rows_affected`. A transition that loses the race
//! reports what it found instead of overwriting it. The expiry sweep uses
//! the exact same statements, so a sweep can never clobber a genuine
//! completion.
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations (device, command, ...)

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::command::{CommandRepository, CompletionResult};
pub use repository::device::{DeviceRepository, HeartbeatUpdate};
pub use repository::event::EventLogRepository;
pub use repository::message::MessageRepository;
pub use repository::sync_package::{FetchResult, OutcomeResult, SyncPackageRepository};
