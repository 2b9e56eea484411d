//! # Device Coordinator
//!
//! The single entry point that sequences authentication, queue mutation
//! and liveness updates for every request.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Device-Facing Request Flow                           │
//! │                                                                         │
//! │  device poll/report/message/heartbeat                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  1. Rate limit check ──────── over budget ──► RateLimited              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  2. Authenticate ──── bad token ──► InvalidCredential                  │
//! │       │               no device ──► UnknownDevice                      │
//! │       │               (neither path touches last_seen: an attacker     │
//! │       │                must not be able to make a device look alive)   │
//! │       ▼                                                                 │
//! │  3. touch last_seen  ◄── ANY authenticated call keeps a device         │
//! │       │                  classified online - no dedicated heartbeat    │
//! │       │                  needed                                        │
//! │       ▼                                                                 │
//! │  4. Operation (CAS transition in drophub-db)                           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Admin operations enter through the same facade with elevated trust and
//! no device credential.
//!
//! ## Concurrency
//! The coordinator holds no per-device locks. Linearizability of
//! `next_pending` / `complete` / `report_fetch` / `report_outcome` per
//! device comes from the repositories' compare-and-set transitions over
//! SQLite's serialized writer; requests for different devices proceed
//! without contention beyond the connection pool.
//!
//! ## Known Limitation
//! A `delivered` command already in flight on the device cannot be
//! recalled - the hub never reaches into a device. Superseding it means
//! enqueuing a new command; expiry is the only timeout mechanism.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::credentials::CredentialStore;
use crate::error::{HubError, HubResult};
use crate::rate_limit::RateLimiter;
use drophub_core::{
    liveness, validation, Command, CommandState, Device, EventLogEntry, Liveness,
    LivenessThresholds, Message, MessageSeverity, PackageStatus, SyncHistoryRecord, SyncPackage,
    SystemStats, DEFAULT_DEVICE_CLASS, MAX_QUEUE_DEPTH, MAX_RESULT_BYTES,
};
use drophub_db::{
    CompletionResult, Database, DbError, FetchResult, HeartbeatUpdate, OutcomeResult,
};

// =============================================================================
// Response Types
// =============================================================================

/// Registration response. The only place the plaintext token ever
/// appears.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredDevice {
    pub device_id: String,
    pub name: String,
    pub device_class: String,
    pub token: String,
}

/// Acknowledgement of a completion report.
///
/// `duplicate = true` means the command was already terminal and the
/// report changed nothing - success from the device's point of view.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionAck {
    pub command_id: String,
    pub state: CommandState,
    pub duplicate: bool,
}

/// Acknowledgement of a sync fetch/outcome report.
#[derive(Debug, Clone, Serialize)]
pub struct SyncAck {
    pub package_id: String,
    pub status: PackageStatus,
    pub duplicate: bool,
}

/// A device as the admin dashboard sees it: registry fields plus the
/// liveness computed for this read. The credential hash never leaves the
/// engine.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub device_id: String,
    pub name: String,
    pub device_class: String,
    pub liveness: Liveness,
    pub last_seen: Option<DateTime<Utc>>,
    pub reported_status: Option<String>,
    pub network_address: Option<String>,
    pub firmware_version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Self-status a device can query about itself.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub liveness: Liveness,
    pub last_seen: Option<DateTime<Utc>>,
    pub firmware_version: Option<String>,
    pub pending_commands: i64,
    pub recent_messages: Vec<Message>,
}

/// Everything the hub remembers about one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceHistory {
    pub commands: Vec<Command>,
    pub messages: Vec<Message>,
    pub sync_history: Vec<SyncHistoryRecord>,
}

/// Admin input for staging a sync package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    pub target_device_id: String,
    /// "firmware", "config", "data", "script".
    pub kind: String,
    /// Where the device can retrieve the content.
    pub content_path: String,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub size_bytes: i64,
    #[serde(default)]
    pub description: Option<String>,
}

/// What one expiry sweep accomplished.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepReport {
    pub commands_expired: u64,
    pub packages_failed: u64,
    pub rows_pruned: u64,
}

// =============================================================================
// Device Coordinator
// =============================================================================

/// The coordination facade. Cheap to share behind an `Arc`.
pub struct DeviceCoordinator {
    db: Database,
    credentials: CredentialStore,
    limiter: RateLimiter,
    thresholds: LivenessThresholds,
    config: HubConfig,
}

impl DeviceCoordinator {
    /// Creates a coordinator over a connected database.
    pub fn new(db: Database, config: HubConfig) -> HubResult<Self> {
        config.validate()?;
        let thresholds = config
            .liveness_thresholds()
            .ok_or_else(|| HubError::InvalidConfig("liveness thresholds".to_string()))?;

        let limiter = RateLimiter::new(
            config.limits.max_requests,
            std::time::Duration::from_secs(config.limits.window_secs),
        );

        Ok(DeviceCoordinator {
            db,
            credentials: CredentialStore::new(),
            limiter,
            thresholds,
            config,
        })
    }

    /// The engine's configuration (read-only).
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Rate-limit, authenticate, and record the contact.
    ///
    /// On any failure this returns before a single row is written -
    /// in particular `last_seen` stays untouched, so an attacker without
    /// a valid token cannot make a device appear alive.
    async fn authenticate(&self, device_id: &str, token: &str) -> HubResult<Device> {
        if !self.limiter.check(device_id) {
            warn!(device_id = %device_id, "Rate limit exceeded");
            return Err(HubError::RateLimited(device_id.to_string()));
        }

        let device = match self.db.devices().find(device_id).await? {
            Some(device) if device.is_active => device,
            Some(_) => {
                // Deregistered: the id no longer owns a live credential
                return Err(HubError::UnknownDevice(device_id.to_string()));
            }
            None => match self.try_allowlist_register(device_id, token).await? {
                Some(device) => device,
                None => return Err(HubError::UnknownDevice(device_id.to_string())),
            },
        };

        if !self.credentials.verify(&device.token_hash, token) {
            debug!(device_id = %device_id, "Credential rejected");
            return Err(HubError::InvalidCredential(device_id.to_string()));
        }

        self.db.devices().touch_last_seen(device_id, Utc::now()).await?;

        Ok(device)
    }

    /// First-contact registration from the config allowlist, when the
    /// policy allows it.
    async fn try_allowlist_register(
        &self,
        device_id: &str,
        presented: &str,
    ) -> HubResult<Option<Device>> {
        if !self.config.registration.auto_register {
            return Ok(None);
        }

        let Some(entry) = self
            .config
            .registration
            .allowlist
            .iter()
            .find(|e| e.device_id == device_id)
        else {
            return Ok(None);
        };

        // Same constant-time path as a normal verification
        let provisioned_hash = self.credentials.hash_token(&entry.token)?;
        if !self.credentials.verify(&provisioned_hash, presented) {
            return Ok(None);
        }

        let name = entry
            .name
            .clone()
            .unwrap_or_else(|| format!("Device {device_id}"));
        let class = entry.class.as_deref().unwrap_or(DEFAULT_DEVICE_CLASS);
        let now = Utc::now();

        let device = match self
            .db
            .devices()
            .create(device_id, &name, class, &provisioned_hash, now)
            .await
        {
            Ok(device) => device,
            // Two first contacts racing: whoever lost re-reads the winner
            Err(DbError::UniqueViolation { .. }) => {
                return Ok(self.db.devices().find(device_id).await?);
            }
            Err(e) => return Err(e.into()),
        };

        info!(device_id = %device_id, "Device registered from allowlist on first contact");
        self.record_event(
            "device_registered",
            "system",
            &format!("Device {device_id} registered from allowlist on first contact"),
            MessageSeverity::Info,
            None,
        )
        .await?;

        Ok(Some(device))
    }

    // =========================================================================
    // Device-Facing Operations
    // =========================================================================

    /// Delivers the next eligible command, if any.
    ///
    /// `None` when the queue is empty; polling with an empty queue is a
    /// pure no-op and safe at any frequency the rate limit allows.
    pub async fn poll_command(&self, device_id: &str, token: &str) -> HubResult<Option<Command>> {
        self.authenticate(device_id, token).await?;

        let delivered = self.db.commands().next_pending(device_id, Utc::now()).await?;

        if let Some(ref command) = delivered {
            self.record_event(
                "command_delivered",
                device_id,
                &format!("Command '{}' delivered to device {device_id}", command.kind),
                MessageSeverity::Info,
                Some(&serde_json::json!({ "command_id": command.id }).to_string()),
            )
            .await?;
        }

        Ok(delivered)
    }

    /// Applies a completion report.
    ///
    /// A report for an already-terminal command succeeds with
    /// `duplicate = true` and no side effect - blind retries are part of
    /// the protocol, not an anomaly.
    pub async fn complete_command(
        &self,
        device_id: &str,
        token: &str,
        command_id: &str,
        result: Option<&str>,
        success: bool,
    ) -> HubResult<CompletionAck> {
        if result.map(str::len).unwrap_or(0) > MAX_RESULT_BYTES {
            return Err(HubError::Validation(
                drophub_core::ValidationError::TooLong {
                    field: "result".to_string(),
                    max: MAX_RESULT_BYTES,
                },
            ));
        }

        self.authenticate(device_id, token).await?;

        let outcome = self
            .db
            .commands()
            .complete(device_id, command_id, result, success, Utc::now())
            .await?;

        match outcome {
            CompletionResult::Applied(command) => {
                let event = if success { "command_completed" } else { "command_failed" };
                self.record_event(
                    event,
                    device_id,
                    &format!("Command '{}' {} by device {device_id}", command.kind, command.state),
                    MessageSeverity::Info,
                    Some(&serde_json::json!({ "command_id": command.id }).to_string()),
                )
                .await?;
                Ok(CompletionAck {
                    command_id: command.id,
                    state: command.state,
                    duplicate: false,
                })
            }
            CompletionResult::Duplicate(command) => {
                debug!(command_id = %command_id, "Duplicate completion report absorbed");
                Ok(CompletionAck {
                    command_id: command.id,
                    state: command.state,
                    duplicate: true,
                })
            }
            CompletionResult::NotDelivered(_) => {
                Err(HubError::CommandNotDelivered(command_id.to_string()))
            }
            CompletionResult::WrongDevice(_) => Err(HubError::WrongDevice {
                subject: format!("Command {command_id}"),
                device_id: device_id.to_string(),
            }),
            CompletionResult::NotFound => Err(HubError::UnknownCommand(command_id.to_string())),
        }
    }

    /// Records a device-originated message; warning-or-worse severities
    /// also land in the event log as alerts.
    pub async fn submit_message(
        &self,
        device_id: &str,
        token: &str,
        kind: &str,
        severity: MessageSeverity,
        content: &str,
    ) -> HubResult<Message> {
        validation::validate_name("kind", kind)?;
        self.authenticate(device_id, token).await?;

        let message = self
            .db
            .messages()
            .append(device_id, kind, severity, content, Utc::now())
            .await?;

        if severity.is_alert() {
            self.record_event(
                "device_alert",
                device_id,
                &format!("Device {device_id} reported {severity}: {content}"),
                severity,
                None,
            )
            .await?;
        }

        Ok(message)
    }

    /// Processes a heartbeat: refreshes `last_seen` plus whatever
    /// metadata the device chose to report. Returns the server time for
    /// device-side clock sanity checks.
    pub async fn heartbeat(
        &self,
        device_id: &str,
        token: &str,
        update: HeartbeatUpdate,
    ) -> HubResult<DateTime<Utc>> {
        self.authenticate(device_id, token).await?;

        let now = Utc::now();
        self.db.devices().record_heartbeat(device_id, &update, now).await?;

        Ok(now)
    }

    /// Self-status for a device: liveness, queue depth, recent messages.
    pub async fn device_status(&self, device_id: &str, token: &str) -> HubResult<DeviceStatus> {
        self.authenticate(device_id, token).await?;

        // Re-read after the touch so the device sees itself online
        let device = self
            .db
            .devices()
            .find(device_id)
            .await?
            .ok_or_else(|| HubError::UnknownDevice(device_id.to_string()))?;

        let pending = self.db.commands().queue_depth(device_id).await?;
        let recent = self.db.messages().recent(device_id, 5).await?;

        Ok(DeviceStatus {
            device_id: device.device_id,
            liveness: liveness::classify(device.last_seen, Utc::now(), &self.thresholds),
            last_seen: device.last_seen,
            firmware_version: device.firmware_version,
            pending_commands: pending,
            recent_messages: recent,
        })
    }

    /// Non-terminal packages staged for this device, in creation order.
    /// Side-effect-free beyond the `last_seen` touch.
    pub async fn list_sync_packages(
        &self,
        device_id: &str,
        token: &str,
    ) -> HubResult<Vec<SyncPackage>> {
        self.authenticate(device_id, token).await?;
        Ok(self.db.sync_packages().list_for_device(device_id).await?)
    }

    /// Applies a fetch report. Idempotent: re-reports succeed with
    /// `duplicate = true`.
    pub async fn report_sync_fetch(
        &self,
        device_id: &str,
        token: &str,
        package_id: &str,
    ) -> HubResult<SyncAck> {
        self.authenticate(device_id, token).await?;

        let outcome = self
            .db
            .sync_packages()
            .report_fetch(device_id, package_id, Utc::now())
            .await?;

        match outcome {
            FetchResult::Applied(package) => {
                self.record_event(
                    "package_fetched",
                    device_id,
                    &format!("Package '{}' fetched by device {device_id}", package.name),
                    MessageSeverity::Info,
                    Some(&serde_json::json!({ "package_id": package.id }).to_string()),
                )
                .await?;
                Ok(SyncAck {
                    package_id: package.id,
                    status: package.status,
                    duplicate: false,
                })
            }
            FetchResult::Duplicate(package) | FetchResult::AlreadyResolved(package) => {
                debug!(package_id = %package_id, "Duplicate fetch report absorbed");
                Ok(SyncAck {
                    package_id: package.id,
                    status: package.status,
                    duplicate: true,
                })
            }
            FetchResult::WrongDevice(_) => Err(HubError::WrongDevice {
                subject: format!("Package {package_id}"),
                device_id: device_id.to_string(),
            }),
            FetchResult::NotFound => Err(HubError::UnknownPackage(package_id.to_string())),
        }
    }

    /// Applies a deploy outcome report. Terminal duplicates succeed with
    /// `duplicate = true`; an outcome for a never-fetched package is a
    /// desync and is rejected.
    pub async fn report_sync_outcome(
        &self,
        device_id: &str,
        token: &str,
        package_id: &str,
        success: bool,
        detail: Option<&str>,
    ) -> HubResult<SyncAck> {
        self.authenticate(device_id, token).await?;

        let outcome = self
            .db
            .sync_packages()
            .report_outcome(device_id, package_id, success, detail, Utc::now())
            .await?;

        match outcome {
            OutcomeResult::Applied(package) => {
                let event = if success { "package_acknowledged" } else { "package_failed" };
                self.record_event(
                    event,
                    device_id,
                    &format!("Package '{}' {} on device {device_id}", package.name, package.status),
                    MessageSeverity::Info,
                    Some(&serde_json::json!({ "package_id": package.id }).to_string()),
                )
                .await?;
                Ok(SyncAck {
                    package_id: package.id,
                    status: package.status,
                    duplicate: false,
                })
            }
            OutcomeResult::Duplicate(package) => {
                debug!(package_id = %package_id, "Duplicate outcome report absorbed");
                Ok(SyncAck {
                    package_id: package.id,
                    status: package.status,
                    duplicate: true,
                })
            }
            OutcomeResult::NotFetched(_) => {
                Err(HubError::PackageNotFetched(package_id.to_string()))
            }
            OutcomeResult::WrongDevice(_) => Err(HubError::WrongDevice {
                subject: format!("Package {package_id}"),
                device_id: device_id.to_string(),
            }),
            OutcomeResult::NotFound => Err(HubError::UnknownPackage(package_id.to_string())),
        }
    }

    // =========================================================================
    // Admin Operations
    // =========================================================================

    /// Registers a device (or rotates the credential of an existing one)
    /// and returns the one-time plaintext token.
    pub async fn register_device(
        &self,
        device_id: &str,
        name: Option<&str>,
        device_class: Option<&str>,
    ) -> HubResult<RegisteredDevice> {
        validation::validate_device_id(device_id)?;
        if let Some(name) = name {
            validation::validate_name("name", name)?;
        }

        let token = self.credentials.generate_token();
        let token_hash = self.credentials.hash_token(&token)?;

        let (device, event) = match self.db.devices().find(device_id).await? {
            Some(_) => {
                self.db
                    .devices()
                    .rotate_credential(device_id, name, device_class, &token_hash)
                    .await?;
                let device = self
                    .db
                    .devices()
                    .find(device_id)
                    .await?
                    .ok_or_else(|| HubError::UnknownDevice(device_id.to_string()))?;
                (device, "device_reregistered")
            }
            None => {
                let name = name
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Device {device_id}"));
                let class = device_class.unwrap_or(DEFAULT_DEVICE_CLASS);
                let device = self
                    .db
                    .devices()
                    .create(device_id, &name, class, &token_hash, Utc::now())
                    .await?;
                (device, "device_registered")
            }
        };

        info!(device_id = %device_id, event, "Device registration complete");
        self.record_event(
            event,
            "admin",
            &format!("Device {device_id} registered by admin"),
            MessageSeverity::Info,
            None,
        )
        .await?;

        Ok(RegisteredDevice {
            device_id: device.device_id,
            name: device.name,
            device_class: device.device_class,
            token,
        })
    }

    /// Deregisters a device. Explicit and logged, never silent; history
    /// stays behind for audit.
    pub async fn revoke_device(&self, device_id: &str) -> HubResult<()> {
        match self.db.devices().deactivate(device_id).await {
            Ok(()) => {}
            Err(DbError::NotFound { .. }) => {
                return Err(HubError::UnknownDevice(device_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        info!(device_id = %device_id, "Device credential revoked");
        self.record_event(
            "device_revoked",
            "admin",
            &format!("Device {device_id} deregistered and credential revoked"),
            MessageSeverity::Warning,
            None,
        )
        .await?;

        Ok(())
    }

    /// Enqueues a command for a device.
    pub async fn enqueue_command(
        &self,
        device_id: &str,
        kind: &str,
        args: Option<&str>,
        priority: i64,
        ttl_secs: Option<i64>,
    ) -> HubResult<Command> {
        validation::validate_name("kind", kind)?;
        validation::validate_priority(priority)?;
        validation::validate_ttl_secs(ttl_secs)?;
        validation::validate_args_json(args)?;

        match self.db.devices().find(device_id).await? {
            Some(device) if device.is_active => {}
            _ => return Err(HubError::UnknownDevice(device_id.to_string())),
        }

        if self.db.commands().queue_depth(device_id).await? >= MAX_QUEUE_DEPTH {
            return Err(HubError::QueueFull(device_id.to_string()));
        }

        let now = Utc::now();
        let ttl = ttl_secs.or(self.config.queue.default_ttl_secs);
        let expires_at = ttl.map(|secs| now + Duration::seconds(secs));

        let command = self
            .db
            .commands()
            .enqueue(device_id, kind, args, priority, expires_at, now)
            .await?;

        self.record_event(
            "command_queued",
            "admin",
            &format!("Command '{kind}' queued for device {device_id}"),
            MessageSeverity::Info,
            Some(&serde_json::json!({ "command_id": command.id }).to_string()),
        )
        .await?;

        Ok(command)
    }

    /// Stages a sync package for a device.
    pub async fn stage_package(&self, spec: &PackageSpec) -> HubResult<SyncPackage> {
        validation::validate_name("name", &spec.name)?;
        validation::validate_name("kind", &spec.kind)?;

        match self.db.devices().find(&spec.target_device_id).await? {
            Some(device) if device.is_active => {}
            _ => return Err(HubError::UnknownDevice(spec.target_device_id.clone())),
        }

        let package = self
            .db
            .sync_packages()
            .stage(
                &spec.name,
                &spec.target_device_id,
                &spec.kind,
                &spec.content_path,
                spec.checksum.as_deref(),
                spec.size_bytes,
                spec.description.as_deref(),
                Utc::now(),
            )
            .await?;

        self.record_event(
            "package_staged",
            "admin",
            &format!(
                "Package '{}' staged for device {}",
                spec.name, spec.target_device_id
            ),
            MessageSeverity::Info,
            Some(&serde_json::json!({ "package_id": package.id }).to_string()),
        )
        .await?;

        Ok(package)
    }

    /// Devices with their liveness computed at this instant.
    pub async fn list_devices(&self, include_inactive: bool) -> HubResult<Vec<DeviceSummary>> {
        let now = Utc::now();
        let devices = self.db.devices().list(include_inactive).await?;

        Ok(devices
            .into_iter()
            .map(|device| self.summarize(device, now))
            .collect())
    }

    /// All packages, newest first.
    pub async fn list_packages(&self, limit: i64) -> HubResult<Vec<SyncPackage>> {
        Ok(self.db.sync_packages().list_all(limit).await?)
    }

    /// Everything the hub remembers about one device.
    pub async fn device_history(&self, device_id: &str, limit: i64) -> HubResult<DeviceHistory> {
        // History survives deregistration, so no is_active gate here -
        // but a never-registered id is still an error
        if self.db.devices().find(device_id).await?.is_none() {
            return Err(HubError::UnknownDevice(device_id.to_string()));
        }

        Ok(DeviceHistory {
            commands: self.db.commands().history(device_id, limit).await?,
            messages: self.db.messages().recent(device_id, limit).await?,
            sync_history: self
                .db
                .sync_packages()
                .history_for_device(device_id, limit)
                .await?,
        })
    }

    /// Recent audit events, newest first.
    pub async fn recent_events(&self, limit: i64) -> HubResult<Vec<EventLogEntry>> {
        Ok(self.db.events().recent(limit).await?)
    }

    /// Fleet-wide counters.
    pub async fn system_stats(&self) -> HubResult<SystemStats> {
        let now = Utc::now();
        let active = self.db.devices().list(false).await?;
        let online = active
            .iter()
            .filter(|d| {
                liveness::classify(d.last_seen, now, &self.thresholds) == Liveness::Online
            })
            .count() as i64;

        Ok(SystemStats {
            devices_total: self.db.devices().count_total().await?,
            devices_active: active.len() as i64,
            devices_online: online,
            commands_pending: self.db.commands().count_in_state(CommandState::Queued).await?,
            commands_in_flight: self
                .db
                .commands()
                .count_in_state(CommandState::Delivered)
                .await?,
            messages_total: self.db.messages().count_total().await?,
            packages_pending: self.db.sync_packages().count_pending().await?,
        })
    }

    // =========================================================================
    // Sweeps
    // =========================================================================

    /// One expiry pass: TTL'd commands → expired, stuck packages →
    /// failed, retention pruning. Uses the same CAS transitions as live
    /// requests, so it can never race a genuine completion into
    /// oblivion.
    pub async fn run_expiry_sweep(&self) -> HubResult<SweepReport> {
        let now = Utc::now();

        let commands_expired = self
            .db
            .commands()
            .expire_due(now, self.config.queue.expire_delivered)
            .await?;

        let sync_cutoff = now - Duration::seconds(self.config.sync.window_secs);
        let packages_failed = self.db.sync_packages().expire_stuck(sync_cutoff, now).await?;

        let mut rows_pruned = 0;
        if let Some(days) = self.config.queue.retention_days {
            let cutoff = now - Duration::days(days);
            rows_pruned += self.db.commands().prune_terminal(cutoff).await?;
            rows_pruned += self.db.messages().prune_before(cutoff).await?;
            rows_pruned += self.db.events().prune_before(cutoff).await?;
        }

        let report = SweepReport {
            commands_expired,
            packages_failed,
            rows_pruned,
        };

        if commands_expired > 0 || packages_failed > 0 {
            info!(
                commands_expired,
                packages_failed, "Expiry sweep moved stale work to terminal states"
            );
            self.record_event(
                "expiry_sweep",
                "system",
                &format!(
                    "Sweep expired {commands_expired} command(s), failed {packages_failed} package(s)"
                ),
                MessageSeverity::Info,
                None,
            )
            .await?;
        }

        Ok(report)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn summarize(&self, device: Device, now: DateTime<Utc>) -> DeviceSummary {
        DeviceSummary {
            liveness: liveness::classify(device.last_seen, now, &self.thresholds),
            device_id: device.device_id,
            name: device.name,
            device_class: device.device_class,
            last_seen: device.last_seen,
            reported_status: device.reported_status,
            network_address: device.network_address,
            firmware_version: device.firmware_version,
            created_at: device.created_at,
            is_active: device.is_active,
        }
    }

    async fn record_event(
        &self,
        event_type: &str,
        source: &str,
        message: &str,
        severity: MessageSeverity,
        data: Option<&str>,
    ) -> HubResult<()> {
        self.db
            .events()
            .record(event_type, source, message, severity, data, Utc::now())
            .await?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use drophub_db::DbConfig;
    use std::sync::Arc;

    async fn test_coordinator() -> DeviceCoordinator {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        DeviceCoordinator::new(db, HubConfig::default()).unwrap()
    }

    async fn register(coord: &DeviceCoordinator, device_id: &str) -> String {
        coord
            .register_device(device_id, None, None)
            .await
            .unwrap()
            .token
    }

    #[tokio::test]
    async fn test_reboot_scenario_end_to_end() {
        // register → enqueue → poll → complete → duplicate complete
        let coord = test_coordinator().await;
        let token = register(&coord, "esp001").await;

        let queued = coord
            .enqueue_command("esp001", "reboot", None, 1, None)
            .await
            .unwrap();
        assert_eq!(queued.state, CommandState::Queued);

        let delivered = coord.poll_command("esp001", &token).await.unwrap().unwrap();
        assert_eq!(delivered.id, queued.id);
        assert_eq!(delivered.state, CommandState::Delivered);

        let ack = coord
            .complete_command("esp001", &token, &delivered.id, Some("rebooted"), true)
            .await
            .unwrap();
        assert_eq!(ack.state, CommandState::Completed);
        assert!(!ack.duplicate);

        // The blind retry is a success with no side effect
        let retry = coord
            .complete_command("esp001", &token, &delivered.id, Some("rebooted"), true)
            .await
            .unwrap();
        assert_eq!(retry.state, CommandState::Completed);
        assert!(retry.duplicate);

        // Queue drained
        assert!(coord.poll_command("esp001", &token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_completions_agree() {
        let coord = Arc::new(test_coordinator().await);
        let token = register(&coord, "esp001").await;

        coord
            .enqueue_command("esp001", "reboot", None, 0, None)
            .await
            .unwrap();
        let cmd = coord.poll_command("esp001", &token).await.unwrap().unwrap();

        let a = {
            let coord = coord.clone();
            let token = token.clone();
            let id = cmd.id.clone();
            tokio::spawn(async move {
                coord.complete_command("esp001", &token, &id, None, true).await
            })
        };
        let b = {
            let coord = coord.clone();
            let token = token.clone();
            let id = cmd.id.clone();
            tokio::spawn(async move {
                coord.complete_command("esp001", &token, &id, None, true).await
            })
        };

        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());

        // Both succeed; exactly one performed the transition
        assert_eq!(a.state, CommandState::Completed);
        assert_eq!(b.state, CommandState::Completed);
        assert_eq!(
            [a.duplicate, b.duplicate].iter().filter(|d| **d).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_invalid_credential_leaves_no_trace() {
        let coord = test_coordinator().await;
        let _token = register(&coord, "esp001").await;

        let err = coord.poll_command("esp001", "wrong-token").await.unwrap_err();
        assert!(matches!(err, HubError::InvalidCredential(_)));

        // last_seen untouched → still offline
        let devices = coord.list_devices(false).await.unwrap();
        assert_eq!(devices[0].liveness, Liveness::Offline);
        assert!(devices[0].last_seen.is_none());

        let err = coord.poll_command("ghost", "whatever").await.unwrap_err();
        assert!(matches!(err, HubError::UnknownDevice(_)));
    }

    #[tokio::test]
    async fn test_authenticated_contact_flips_liveness() {
        let coord = test_coordinator().await;
        let token = register(&coord, "esp001").await;

        // Any authenticated call counts - a poll, not just a heartbeat
        coord.poll_command("esp001", &token).await.unwrap();

        let devices = coord.list_devices(false).await.unwrap();
        assert_eq!(devices[0].liveness, Liveness::Online);
    }

    #[tokio::test]
    async fn test_revoked_device_is_unknown() {
        let coord = test_coordinator().await;
        let token = register(&coord, "esp001").await;

        coord.revoke_device("esp001").await.unwrap();

        let err = coord.poll_command("esp001", &token).await.unwrap_err();
        assert!(matches!(err, HubError::UnknownDevice(_)));

        // But its history is still queryable for audit
        assert!(coord.device_history("esp001", 10).await.is_ok());

        // And commands can no longer target it
        let err = coord
            .enqueue_command("esp001", "reboot", None, 0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::UnknownDevice(_)));
    }

    #[tokio::test]
    async fn test_allowlist_first_contact_registration() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut config = HubConfig::default();
        config.registration.auto_register = true;
        config.registration.allowlist.push(crate::config::AllowlistEntry {
            device_id: "esp007".to_string(),
            token: "provisioned-secret".to_string(),
            name: Some("Field unit".to_string()),
            class: None,
        });
        let coord = DeviceCoordinator::new(db, config).unwrap();

        // Wrong token: no registration happens
        let err = coord.poll_command("esp007", "guess").await.unwrap_err();
        assert!(matches!(err, HubError::UnknownDevice(_)));
        assert!(coord.list_devices(true).await.unwrap().is_empty());

        // Right token: registered and served in one round trip
        let result = coord.poll_command("esp007", "provisioned-secret").await.unwrap();
        assert!(result.is_none());

        let devices = coord.list_devices(false).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Field unit");
        assert_eq!(devices[0].liveness, Liveness::Online);
    }

    #[tokio::test]
    async fn test_rate_limit_trips_before_auth() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut config = HubConfig::default();
        config.limits.max_requests = 2;
        let coord = DeviceCoordinator::new(db, config).unwrap();
        let token = register(&coord, "esp001").await;

        coord.poll_command("esp001", &token).await.unwrap();
        coord.poll_command("esp001", &token).await.unwrap();
        let err = coord.poll_command("esp001", &token).await.unwrap_err();
        assert!(matches!(err, HubError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_message_alert_escalation() {
        let coord = test_coordinator().await;
        let token = register(&coord, "esp001").await;

        coord
            .submit_message("esp001", &token, "log", MessageSeverity::Info, "boot ok")
            .await
            .unwrap();
        coord
            .submit_message("esp001", &token, "error", MessageSeverity::Critical, "flame!")
            .await
            .unwrap();

        let alerts: Vec<_> = coord
            .recent_events(50)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == "device_alert")
            .collect();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, MessageSeverity::Critical);
    }

    #[tokio::test]
    async fn test_sync_package_full_cycle() {
        let coord = test_coordinator().await;
        let token = register(&coord, "esp002").await;

        let spec = PackageSpec {
            name: "sensor-fw-1.4.2".to_string(),
            target_device_id: "esp002".to_string(),
            kind: "firmware".to_string(),
            content_path: "packages/sensor-fw-1.4.2.bin".to_string(),
            checksum: Some("deadbeef".to_string()),
            size_bytes: 51200,
            description: None,
        };
        let staged = coord.stage_package(&spec).await.unwrap();

        let listed = coord.list_sync_packages("esp002", &token).await.unwrap();
        assert_eq!(listed.len(), 1);

        let fetched = coord
            .report_sync_fetch("esp002", &token, &staged.id)
            .await
            .unwrap();
        assert_eq!(fetched.status, PackageStatus::Fetched);

        // Retry absorbed
        let again = coord
            .report_sync_fetch("esp002", &token, &staged.id)
            .await
            .unwrap();
        assert!(again.duplicate);

        let ack = coord
            .report_sync_outcome("esp002", &token, &staged.id, true, None)
            .await
            .unwrap();
        assert_eq!(ack.status, PackageStatus::Acknowledged);

        // Terminal package no longer listed
        assert!(coord.list_sync_packages("esp002", &token).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unfetched_package_surfaces_as_failed() {
        let db = Database::new(drophub_db::DbConfig::in_memory()).await.unwrap();
        let mut config = HubConfig::default();
        config.sync.window_secs = 1;
        let coord = DeviceCoordinator::new(db, config).unwrap();
        let token = register(&coord, "esp002").await;

        let spec = PackageSpec {
            name: "config-v2".to_string(),
            target_device_id: "esp002".to_string(),
            kind: "config".to_string(),
            content_path: "packages/config-v2.json".to_string(),
            checksum: None,
            size_bytes: 640,
            description: None,
        };
        let staged = coord.stage_package(&spec).await.unwrap();

        // No fetch report inside the window
        tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
        let report = coord.run_expiry_sweep().await.unwrap();
        assert_eq!(report.packages_failed, 1);

        // Surfaced as failed, never silently staged forever
        let packages = coord.list_packages(10).await.unwrap();
        assert_eq!(packages[0].id, staged.id);
        assert_eq!(packages[0].status, PackageStatus::Failed);
        assert!(coord.list_sync_packages("esp002", &token).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats_reflect_activity() {
        let coord = test_coordinator().await;
        let token = register(&coord, "esp001").await;
        register(&coord, "esp002").await;

        coord
            .enqueue_command("esp001", "reboot", None, 0, None)
            .await
            .unwrap();
        coord.poll_command("esp001", &token).await.unwrap();
        coord
            .enqueue_command("esp001", "status", None, 0, None)
            .await
            .unwrap();

        let stats = coord.system_stats().await.unwrap();
        assert_eq!(stats.devices_total, 2);
        assert_eq!(stats.devices_active, 2);
        assert_eq!(stats.devices_online, 1);
        assert_eq!(stats.commands_pending, 1);
        assert_eq!(stats.commands_in_flight, 1);
    }

    #[tokio::test]
    async fn test_validation_rejects_garbage_enqueue() {
        let coord = test_coordinator().await;
        register(&coord, "esp001").await;

        assert!(matches!(
            coord.enqueue_command("esp001", "", None, 0, None).await,
            Err(HubError::Validation(_))
        ));
        assert!(matches!(
            coord.enqueue_command("esp001", "reboot", None, 101, None).await,
            Err(HubError::Validation(_))
        ));
        assert!(matches!(
            coord
                .enqueue_command("esp001", "reboot", Some("not json"), 0, None)
                .await,
            Err(HubError::Validation(_))
        ));
    }
}
