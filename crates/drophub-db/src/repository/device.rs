//! # Device Repository
//!
//! Database operations for the device registry.
//!
//! ## Registry Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  • device_id is unique and immutable once registered                   │
//! │  • Re-registering an existing device_id rotates the credential and     │
//! │    reactivates the row - it never creates a second identity            │
//! │  • Deregistration flips is_active; rows are NEVER deleted              │
//! │  • last_seen is the only liveness input; no online flag is stored      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use drophub_core::Device;

/// Fields a heartbeat may refresh beyond `last_seen`.
///
/// All optional: a device that only sends `status=ok` refreshes nothing
/// else.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatUpdate {
    pub reported_status: Option<String>,
    pub network_address: Option<String>,
    pub firmware_version: Option<String>,
}

/// Repository for device registry operations.
#[derive(Debug, Clone)]
pub struct DeviceRepository {
    pool: SqlitePool,
}

impl DeviceRepository {
    /// Creates a new DeviceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DeviceRepository { pool }
    }

    /// Looks up a device by its wire identity.
    pub async fn find(&self, device_id: &str) -> DbResult<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(
            r#"
            SELECT id, device_id, name, device_class, token_hash, last_seen,
                   reported_status, network_address, firmware_version,
                   metadata, created_at, is_active
            FROM devices
            WHERE device_id = ?1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(device)
    }

    /// Registers a brand-new device.
    ///
    /// Fails with [`DbError::UniqueViolation`] if the device_id is taken -
    /// callers that want rotate-on-reregister semantics should use
    /// [`Self::rotate_credential`] after a `find`.
    pub async fn create(
        &self,
        device_id: &str,
        name: &str,
        device_class: &str,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Device> {
        let device = Device {
            id: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            name: name.to_string(),
            device_class: device_class.to_string(),
            token_hash: token_hash.to_string(),
            last_seen: None,
            reported_status: None,
            network_address: None,
            firmware_version: None,
            metadata: None,
            created_at: now,
            is_active: true,
        };

        debug!(device_id = %device.device_id, class = %device.device_class, "Registering device");

        sqlx::query(
            r#"
            INSERT INTO devices (
                id, device_id, name, device_class, token_hash, last_seen,
                reported_status, network_address, firmware_version,
                metadata, created_at, is_active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&device.id)
        .bind(&device.device_id)
        .bind(&device.name)
        .bind(&device.device_class)
        .bind(&device.token_hash)
        .bind(device.last_seen)
        .bind(&device.reported_status)
        .bind(&device.network_address)
        .bind(&device.firmware_version)
        .bind(&device.metadata)
        .bind(device.created_at)
        .bind(device.is_active)
        .execute(&self.pool)
        .await?;

        Ok(device)
    }

    /// Rotates the credential of an existing device and reactivates it.
    ///
    /// Keeps the invariant that a device_id owns at most one live
    /// credential: the previous hash is overwritten, never kept alongside.
    pub async fn rotate_credential(
        &self,
        device_id: &str,
        name: Option<&str>,
        device_class: Option<&str>,
        token_hash: &str,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE devices SET
                token_hash = ?2,
                name = COALESCE(?3, name),
                device_class = COALESCE(?4, device_class),
                is_active = 1
            WHERE device_id = ?1
            "#,
        )
        .bind(device_id)
        .bind(token_hash)
        .bind(name)
        .bind(device_class)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Device", device_id));
        }

        Ok(())
    }

    /// Records an authenticated contact.
    ///
    /// Called on every successfully authenticated device call - poll,
    /// completion report, message, heartbeat, package listing. Never
    /// called on an authentication failure.
    pub async fn touch_last_seen(&self, device_id: &str, now: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE devices SET last_seen = ?2 WHERE device_id = ?1")
            .bind(device_id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Applies a heartbeat's metadata refresh alongside `last_seen`.
    pub async fn record_heartbeat(
        &self,
        device_id: &str,
        update: &HeartbeatUpdate,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE devices SET
                last_seen = ?2,
                reported_status = COALESCE(?3, reported_status),
                network_address = COALESCE(?4, network_address),
                firmware_version = COALESCE(?5, firmware_version)
            WHERE device_id = ?1
            "#,
        )
        .bind(device_id)
        .bind(now)
        .bind(&update.reported_status)
        .bind(&update.network_address)
        .bind(&update.firmware_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Device", device_id));
        }

        Ok(())
    }

    /// Replaces the admin-editable metadata blob.
    pub async fn update_metadata(&self, device_id: &str, metadata: Option<&str>) -> DbResult<()> {
        let result = sqlx::query("UPDATE devices SET metadata = ?2 WHERE device_id = ?1")
            .bind(device_id)
            .bind(metadata)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Device", device_id));
        }

        Ok(())
    }

    /// Soft-deletes (deregisters) a device. The row and all of its
    /// history stay behind for audit.
    pub async fn deactivate(&self, device_id: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE devices SET is_active = 0 WHERE device_id = ?1")
            .bind(device_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Device", device_id));
        }

        Ok(())
    }

    /// Lists devices, oldest registration first.
    pub async fn list(&self, include_inactive: bool) -> DbResult<Vec<Device>> {
        let devices = if include_inactive {
            sqlx::query_as::<_, Device>(
                r#"
                SELECT id, device_id, name, device_class, token_hash, last_seen,
                       reported_status, network_address, firmware_version,
                       metadata, created_at, is_active
                FROM devices
                ORDER BY created_at ASC
                "#,
            )
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, Device>(
                r#"
                SELECT id, device_id, name, device_class, token_hash, last_seen,
                       reported_status, network_address, firmware_version,
                       metadata, created_at, is_active
                FROM devices
                WHERE is_active = 1
                ORDER BY created_at ASC
                "#,
            )
            .fetch_all(&self.pool)
            .await?
        };

        Ok(devices)
    }

    /// Counts all registered devices.
    pub async fn count_total(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM devices")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Counts devices that have not been deregistered.
    pub async fn count_active(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM devices WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    /// Whole-second timestamp so equality survives the TEXT round trip.
    fn t0() -> DateTime<Utc> {
        use chrono::TimeZone;
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_find() {
        let db = test_db().await;
        let repo = db.devices();
        let now = t0();

        let created = repo
            .create("esp001", "Greenhouse sensor", "esp8266", "hash", now)
            .await
            .unwrap();
        assert!(created.is_active);
        assert!(created.last_seen.is_none());

        let found = repo.find("esp001").await.unwrap().unwrap();
        assert_eq!(found.device_id, "esp001");
        assert_eq!(found.name, "Greenhouse sensor");

        assert!(repo.find("esp999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_device_id_rejected() {
        let db = test_db().await;
        let repo = db.devices();
        let now = t0();

        repo.create("esp001", "First", "esp8266", "hash-a", now)
            .await
            .unwrap();
        let err = repo
            .create("esp001", "Second", "esp32", "hash-b", now)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_rotate_credential_reactivates() {
        let db = test_db().await;
        let repo = db.devices();
        let now = t0();

        repo.create("esp001", "Sensor", "esp8266", "old-hash", now)
            .await
            .unwrap();
        repo.deactivate("esp001").await.unwrap();

        repo.rotate_credential("esp001", None, None, "new-hash")
            .await
            .unwrap();

        let device = repo.find("esp001").await.unwrap().unwrap();
        assert!(device.is_active);
        assert_eq!(device.token_hash, "new-hash");
        // Name untouched by a None
        assert_eq!(device.name, "Sensor");
    }

    #[tokio::test]
    async fn test_touch_and_heartbeat() {
        let db = test_db().await;
        let repo = db.devices();
        let now = t0();

        repo.create("esp001", "Sensor", "esp8266", "hash", now)
            .await
            .unwrap();

        repo.touch_last_seen("esp001", now).await.unwrap();
        let device = repo.find("esp001").await.unwrap().unwrap();
        assert_eq!(device.last_seen, Some(now));

        let update = HeartbeatUpdate {
            reported_status: Some("ok".to_string()),
            network_address: Some("10.0.0.7".to_string()),
            firmware_version: Some("1.4.2".to_string()),
        };
        let later = now + chrono::Duration::seconds(30);
        repo.record_heartbeat("esp001", &update, later).await.unwrap();

        let device = repo.find("esp001").await.unwrap().unwrap();
        assert_eq!(device.last_seen, Some(later));
        assert_eq!(device.firmware_version.as_deref(), Some("1.4.2"));
        assert_eq!(device.network_address.as_deref(), Some("10.0.0.7"));
    }

    #[tokio::test]
    async fn test_list_filters_inactive() {
        let db = test_db().await;
        let repo = db.devices();
        let now = t0();

        repo.create("esp001", "A", "esp8266", "h1", now).await.unwrap();
        repo.create("esp002", "B", "esp8266", "h2", now).await.unwrap();
        repo.deactivate("esp002").await.unwrap();

        assert_eq!(repo.list(false).await.unwrap().len(), 1);
        assert_eq!(repo.list(true).await.unwrap().len(), 2);
        assert_eq!(repo.count_active().await.unwrap(), 1);
        assert_eq!(repo.count_total().await.unwrap(), 2);
    }
}
