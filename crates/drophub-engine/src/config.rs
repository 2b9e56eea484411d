//! # Hub Configuration
//!
//! Configuration management for the coordination engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Explicit path (--config / caller-provided)                         │
//! │                                                                         │
//! │  2. DROPHUB_CONFIG environment variable                                │
//! │                                                                         │
//! │  3. Platform config dir                                                │
//! │     ~/.config/drophub/hub.toml (Linux)                                 │
//! │     ~/Library/Application Support/io.drophub.hub/hub.toml (macOS)      │
//! │                                                                         │
//! │  4. Built-in defaults (no file needed at all)                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # hub.toml
//! [server]
//! bind_addr = "0.0.0.0"
//! port = 8787
//!
//! [storage]
//! database_path = "drophub.db"
//!
//! [liveness]
//! online_within_secs = 300    # contact within 5 min → online
//! offline_after_secs = 1800   # silence past 30 min → offline
//!
//! [queue]
//! default_ttl_secs = 3600     # omit for "commands never expire"
//! expire_delivered = false    # sweep in-flight commands too?
//! sweep_interval_secs = 30
//! retention_days = 30         # omit to keep history forever
//!
//! [sync]
//! window_secs = 86400         # package stuck past this → failed
//!
//! [limits]
//! window_secs = 60
//! max_requests = 120
//!
//! [registration]
//! auto_register = false       # allow first-contact registration from
//!                             # the allowlist below
//!
//! [[registration.allowlist]]
//! device_id = "esp001"
//! token = "provisioned-out-of-band"
//! name = "Greenhouse sensor"
//! class = "esp8266"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{HubError, HubResult};
use drophub_core::LivenessThresholds;

// =============================================================================
// Sections
// =============================================================================

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8787
}

impl ServerConfig {
    /// Returns the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: default_bind_addr(),
            port: default_port(),
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("drophub.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            database_path: default_database_path(),
        }
    }
}

/// Liveness classification thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    #[serde(default = "default_online_within")]
    pub online_within_secs: i64,

    #[serde(default = "default_offline_after")]
    pub offline_after_secs: i64,
}

fn default_online_within() -> i64 {
    300
}

fn default_offline_after() -> i64 {
    1800
}

impl Default for LivenessConfig {
    fn default() -> Self {
        LivenessConfig {
            online_within_secs: default_online_within(),
            offline_after_secs: default_offline_after(),
        }
    }
}

/// Command queue policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// TTL applied when an enqueue doesn't specify one. `None` = commands
    /// never expire by default.
    #[serde(default)]
    pub default_ttl_secs: Option<i64>,

    /// Whether the sweep expires `delivered` commands too. Off by
    /// default: once a command is in the device's hands the hub cannot
    /// recall it, and guessing that it died risks double side effects.
    #[serde(default)]
    pub expire_delivered: bool,

    /// How often the expiry sweep runs.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Terminal commands/messages/events older than this are pruned.
    /// `None` = keep forever.
    #[serde(default)]
    pub retention_days: Option<i64>,
}

fn default_sweep_interval() -> u64 {
    30
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            default_ttl_secs: None,
            expire_delivered: false,
            sweep_interval_secs: default_sweep_interval(),
            retention_days: Some(30),
        }
    }
}

/// Sync staging policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// A package still non-terminal this long after staging (or after its
    /// last fetch) is failed out by the sweep.
    #[serde(default = "default_sync_window")]
    pub window_secs: i64,
}

fn default_sync_window() -> i64 {
    86400
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            window_secs: default_sync_window(),
        }
    }
}

/// Per-device request budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_limit_window")]
    pub window_secs: u64,

    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
}

fn default_limit_window() -> u64 {
    60
}

fn default_max_requests() -> usize {
    120
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            window_secs: default_limit_window(),
            max_requests: default_max_requests(),
        }
    }
}

/// An out-of-band provisioned credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub device_id: String,
    pub token: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
}

/// Registration policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// When true, a first contact matching the allowlist registers the
    /// device on the spot. When false, only explicit admin registration
    /// creates devices.
    #[serde(default)]
    pub auto_register: bool,

    /// Out-of-band provisioned credentials.
    #[serde(default)]
    pub allowlist: Vec<AllowlistEntry>,
}

// =============================================================================
// Hub Config
// =============================================================================

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub liveness: LivenessConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub registration: RegistrationConfig,
}

impl HubConfig {
    /// Loads configuration, falling back through the documented sources.
    ///
    /// A missing file is not an error - defaults cover everything - but a
    /// file that exists and fails to parse is.
    pub fn load(explicit_path: Option<&Path>) -> HubResult<Self> {
        let path = explicit_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("DROPHUB_CONFIG").map(PathBuf::from))
            .or_else(Self::default_config_path);

        let config = match path {
            Some(ref p) if p.exists() => {
                info!(path = %p.display(), "Loading hub configuration");
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| HubError::ConfigLoadFailed(e.to_string()))?;
                toml::from_str(&raw).map_err(|e| HubError::ConfigLoadFailed(e.to_string()))?
            }
            Some(ref p) => {
                debug!(path = %p.display(), "No config file found, using defaults");
                HubConfig::default()
            }
            None => HubConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field invariants.
    pub fn validate(&self) -> HubResult<()> {
        self.liveness_thresholds().ok_or_else(|| {
            HubError::InvalidConfig(format!(
                "liveness thresholds must satisfy 0 < online_within ({}) < offline_after ({})",
                self.liveness.online_within_secs, self.liveness.offline_after_secs
            ))
        })?;

        if self.sync.window_secs <= 0 {
            return Err(HubError::InvalidConfig(
                "sync window must be positive".to_string(),
            ));
        }

        if self.limits.max_requests == 0 {
            return Err(HubError::InvalidConfig(
                "rate limit of zero requests would reject every call".to_string(),
            ));
        }

        Ok(())
    }

    /// The liveness thresholds as the core type, if valid.
    pub fn liveness_thresholds(&self) -> Option<LivenessThresholds> {
        LivenessThresholds::new(
            self.liveness.online_within_secs,
            self.liveness.offline_after_secs,
        )
    }

    /// Platform default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "drophub", "drophub")
            .map(|dirs| dirs.config_dir().join("hub.toml"))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = HubConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.bind_address(), "0.0.0.0:8787");
        assert!(!config.queue.expire_delivered);
        assert!(!config.registration.auto_register);
    }

    #[test]
    fn test_parse_partial_file() {
        let raw = r#"
            [liveness]
            online_within_secs = 60
            offline_after_secs = 600

            [[registration.allowlist]]
            device_id = "esp001"
            token = "abc123"
        "#;
        let config: HubConfig = toml::from_str(raw).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.liveness.online_within_secs, 60);
        assert_eq!(config.registration.allowlist.len(), 1);
        assert_eq!(config.registration.allowlist[0].device_id, "esp001");
        // Unspecified sections fall back to defaults
        assert_eq!(config.server.port, 8787);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let raw = r#"
            [liveness]
            online_within_secs = 600
            offline_after_secs = 60
        "#;
        let config: HubConfig = toml::from_str(raw).unwrap();
        assert!(matches!(
            config.validate(),
            Err(HubError::InvalidConfig(_))
        ));
    }
}
