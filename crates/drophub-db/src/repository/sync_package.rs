//! # Sync Package Repository
//!
//! Database operations for staged sync packages and their append-only
//! history.
//!
//! ## Package Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Sync Package Lifecycle                              │
//! │                                                                         │
//! │  1. STAGE (admin)                                                      │
//! │     └── stage() → SyncPackage { status: Staged }                       │
//! │                                                                         │
//! │  2. FETCH REPORT (device, may repeat)                                  │
//! │     └── CAS: staged → fetched on the FIRST report                      │
//! │     └── history row appended on EVERY report (devices retry blindly)   │
//! │                                                                         │
//! │  3. OUTCOME REPORT (device)                                            │
//! │     └── CAS: fetched → acknowledged | failed                           │
//! │         already terminal → benign duplicate, nothing changes           │
//! │         still staged     → desync, rejected                            │
//! │                                                                         │
//! │  4. SYNC WINDOW SWEEP                                                  │
//! │     └── non-terminal past the window → failed + 'expiry' history row   │
//! │         (surfaced, never silently deleted)                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transition + history append happen in one transaction so history can
//! never claim an event the package row doesn't reflect.

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use drophub_core::{PackageStatus, SyncEvent, SyncHistoryRecord, SyncPackage};

// =============================================================================
// Outcome Types
// =============================================================================

/// What a fetch report did.
#[derive(Debug, Clone)]
pub enum FetchResult {
    /// First report: `staged → fetched`.
    Applied(SyncPackage),
    /// Re-report while still in flight: status untouched, history still
    /// appended.
    Duplicate(SyncPackage),
    /// The package is already terminal; the late report changes nothing
    /// and leaves no history.
    AlreadyResolved(SyncPackage),
    /// The package targets a different device.
    WrongDevice(SyncPackage),
    /// No such package id.
    NotFound,
}

/// What an outcome report did.
#[derive(Debug, Clone)]
pub enum OutcomeResult {
    /// `fetched → acknowledged|failed`.
    Applied(SyncPackage),
    /// Already terminal; nothing changed.
    Duplicate(SyncPackage),
    /// Still `staged` - the device never reported a fetch. Desync.
    NotFetched(SyncPackage),
    /// The package targets a different device.
    WrongDevice(SyncPackage),
    /// No such package id.
    NotFound,
}

// =============================================================================
// Sync Package Repository
// =============================================================================

/// Repository for sync package operations.
#[derive(Debug, Clone)]
pub struct SyncPackageRepository {
    pool: SqlitePool,
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, name, target_device_id, kind, content_path, checksum,
           size_bytes, status, created_at, fetched_at, resolved_at, description
    FROM sync_packages
"#;

impl SyncPackageRepository {
    /// Creates a new SyncPackageRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncPackageRepository { pool }
    }

    /// Gets a package by ID.
    pub async fn get(&self, package_id: &str) -> DbResult<Option<SyncPackage>> {
        let package =
            sqlx::query_as::<_, SyncPackage>(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
                .bind(package_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(package)
    }

    /// Stages a package for a device. Status starts at `staged`.
    #[allow(clippy::too_many_arguments)]
    pub async fn stage(
        &self,
        name: &str,
        target_device_id: &str,
        kind: &str,
        content_path: &str,
        checksum: Option<&str>,
        size_bytes: i64,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<SyncPackage> {
        let package = SyncPackage {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            target_device_id: target_device_id.to_string(),
            kind: kind.to_string(),
            content_path: content_path.to_string(),
            checksum: checksum.map(str::to_string),
            size_bytes,
            status: PackageStatus::Staged,
            created_at: now,
            fetched_at: None,
            resolved_at: None,
            description: description.map(str::to_string),
        };

        debug!(
            package_id = %package.id,
            target = %target_device_id,
            kind = %kind,
            "Staging sync package"
        );

        sqlx::query(
            r#"
            INSERT INTO sync_packages (
                id, name, target_device_id, kind, content_path, checksum,
                size_bytes, status, created_at, fetched_at, resolved_at, description
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&package.id)
        .bind(&package.name)
        .bind(&package.target_device_id)
        .bind(&package.kind)
        .bind(&package.content_path)
        .bind(&package.checksum)
        .bind(package.size_bytes)
        .bind(package.status)
        .bind(package.created_at)
        .bind(package.fetched_at)
        .bind(package.resolved_at)
        .bind(&package.description)
        .execute(&self.pool)
        .await?;

        Ok(package)
    }

    /// Non-terminal packages targeted at a device, in creation order.
    ///
    /// Pure read - devices may call this as often as they like.
    pub async fn list_for_device(&self, device_id: &str) -> DbResult<Vec<SyncPackage>> {
        let packages = sqlx::query_as::<_, SyncPackage>(&format!(
            r#"
            {SELECT_COLUMNS}
            WHERE target_device_id = ?1 AND status IN ('staged', 'fetched')
            ORDER BY created_at ASC
            "#
        ))
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(packages)
    }

    /// All packages, newest first (admin view).
    pub async fn list_all(&self, limit: i64) -> DbResult<Vec<SyncPackage>> {
        let packages = sqlx::query_as::<_, SyncPackage>(&format!(
            "{SELECT_COLUMNS} ORDER BY created_at DESC LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(packages)
    }

    /// Applies a device's fetch report.
    ///
    /// The first report transitions `staged → fetched`; every report
    /// (first or retry) appends a history row, because "the device fetched
    /// again" is a real event worth reconstructing later.
    pub async fn report_fetch(
        &self,
        device_id: &str,
        package_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<FetchResult> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            UPDATE sync_packages SET
                status = 'fetched',
                fetched_at = ?2
            WHERE id = ?1 AND target_device_id = ?3 AND status = 'staged'
            "#,
        )
        .bind(package_id)
        .bind(now)
        .bind(device_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let Some(package) = Self::get_in_tx(&mut tx, package_id).await? else {
            tx.rollback().await.map_err(map_tx_err)?;
            return Ok(FetchResult::NotFound);
        };

        if package.target_device_id != device_id {
            tx.rollback().await.map_err(map_tx_err)?;
            return Ok(FetchResult::WrongDevice(package));
        }

        // Terminal packages take no further reports of any kind
        if rows == 0 && package.status.is_terminal() {
            tx.rollback().await.map_err(map_tx_err)?;
            return Ok(FetchResult::AlreadyResolved(package));
        }

        Self::append_history(&mut tx, device_id, package_id, SyncEvent::Fetch, None, now).await?;
        tx.commit().await.map_err(map_tx_err)?;

        if rows == 1 {
            debug!(package_id = %package_id, device_id = %device_id, "Package fetched");
            Ok(FetchResult::Applied(package))
        } else {
            Ok(FetchResult::Duplicate(package))
        }
    }

    /// Applies a device's deploy outcome report.
    ///
    /// `fetched → acknowledged` on success, `fetched → failed` otherwise.
    /// A report against a terminal package is a benign duplicate; a report
    /// against a still-`staged` package is a desync the caller should
    /// surface.
    pub async fn report_outcome(
        &self,
        device_id: &str,
        package_id: &str,
        success: bool,
        detail: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<OutcomeResult> {
        let (target_status, event) = if success {
            (PackageStatus::Acknowledged, SyncEvent::Acknowledge)
        } else {
            (PackageStatus::Failed, SyncEvent::Failure)
        };

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            UPDATE sync_packages SET
                status = ?4,
                resolved_at = ?2
            WHERE id = ?1 AND target_device_id = ?3 AND status = 'fetched'
            "#,
        )
        .bind(package_id)
        .bind(now)
        .bind(device_id)
        .bind(target_status)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let Some(package) = Self::get_in_tx(&mut tx, package_id).await? else {
            tx.rollback().await.map_err(map_tx_err)?;
            return Ok(OutcomeResult::NotFound);
        };

        if rows == 1 {
            Self::append_history(&mut tx, device_id, package_id, event, detail, now).await?;
            tx.commit().await.map_err(map_tx_err)?;
            debug!(
                package_id = %package_id,
                status = %package.status,
                "Package outcome recorded"
            );
            return Ok(OutcomeResult::Applied(package));
        }

        tx.rollback().await.map_err(map_tx_err)?;

        if package.target_device_id != device_id {
            Ok(OutcomeResult::WrongDevice(package))
        } else if package.status.is_terminal() {
            Ok(OutcomeResult::Duplicate(package))
        } else {
            Ok(OutcomeResult::NotFetched(package))
        }
    }

    /// Fails out packages stuck non-terminal past the sync window.
    ///
    /// The clock starts at staging and restarts at fetch; each expired
    /// package gets an `expiry` history row. Same CAS discipline as the
    /// live reports, so a concurrent acknowledge either lands first or
    /// not at all.
    pub async fn expire_stuck(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> DbResult<u64> {
        let due = sqlx::query_as::<_, SyncPackage>(&format!(
            r#"
            {SELECT_COLUMNS}
            WHERE status IN ('staged', 'fetched')
              AND COALESCE(fetched_at, created_at) <= ?1
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut expired = 0u64;
        for package in due {
            let mut tx = self.pool.begin().await?;

            let rows = sqlx::query(
                r#"
                UPDATE sync_packages SET
                    status = 'failed',
                    resolved_at = ?2
                WHERE id = ?1 AND status IN ('staged', 'fetched')
                "#,
            )
            .bind(&package.id)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if rows == 1 {
                Self::append_history(
                    &mut tx,
                    &package.target_device_id,
                    &package.id,
                    SyncEvent::Expiry,
                    Some("sync window elapsed"),
                    now,
                )
                .await?;
                tx.commit().await.map_err(map_tx_err)?;
                expired += 1;
            } else {
                // A live report resolved it between the scan and the CAS
                tx.rollback().await.map_err(map_tx_err)?;
            }
        }

        Ok(expired)
    }

    /// Sync history for a device, newest first.
    pub async fn history_for_device(
        &self,
        device_id: &str,
        limit: i64,
    ) -> DbResult<Vec<SyncHistoryRecord>> {
        let records = sqlx::query_as::<_, SyncHistoryRecord>(
            r#"
            SELECT id, device_id, package_id, event, detail, created_at
            FROM sync_history
            WHERE device_id = ?1
            ORDER BY created_at DESC
            LIMIT ?2
            "#,
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Full history of one package, oldest first.
    pub async fn history_for_package(&self, package_id: &str) -> DbResult<Vec<SyncHistoryRecord>> {
        let records = sqlx::query_as::<_, SyncHistoryRecord>(
            r#"
            SELECT id, device_id, package_id, event, detail, created_at
            FROM sync_history
            WHERE package_id = ?1
            ORDER BY created_at ASC
            "#,
        )
        .bind(package_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Counts packages not yet terminal.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sync_packages WHERE status IN ('staged', 'fetched')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn get_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        package_id: &str,
    ) -> DbResult<Option<SyncPackage>> {
        let package =
            sqlx::query_as::<_, SyncPackage>(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
                .bind(package_id)
                .fetch_optional(&mut **tx)
                .await?;
        Ok(package)
    }

    async fn append_history(
        tx: &mut Transaction<'_, Sqlite>,
        device_id: &str,
        package_id: &str,
        event: SyncEvent,
        detail: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_history (id, device_id, package_id, event, detail, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(device_id)
        .bind(package_id)
        .bind(event)
        .bind(detail)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

fn map_tx_err(err: sqlx::Error) -> DbError {
    DbError::TransactionFailed(err.to_string())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    async fn stage_one(repo: &SyncPackageRepository, device: &str) -> SyncPackage {
        repo.stage(
            "sensor-fw-1.4.2",
            device,
            "firmware",
            "packages/sensor-fw-1.4.2.bin",
            Some("deadbeef"),
            51200,
            Some("October firmware rollout"),
            t(0),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_stage_and_list_in_creation_order() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sync_packages();

        let first = stage_one(&repo, "esp002").await;
        let second = repo
            .stage("config-v2", "esp002", "config", "packages/config-v2.json",
                   None, 640, None, t(5))
            .await
            .unwrap();
        stage_one(&repo, "esp003").await;

        let listed = repo.list_for_device("esp002").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);

        // Listing is a pure read
        let again = repo.list_for_device("esp002").await.unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(again[0].status, PackageStatus::Staged);
    }

    #[tokio::test]
    async fn test_fetch_is_idempotent_but_history_accumulates() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sync_packages();
        let pkg = stage_one(&repo, "esp002").await;

        let first = repo.report_fetch("esp002", &pkg.id, t(10)).await.unwrap();
        assert!(matches!(first, FetchResult::Applied(_)));

        let second = repo.report_fetch("esp002", &pkg.id, t(11)).await.unwrap();
        let FetchResult::Duplicate(current) = second else {
            panic!("second fetch report must be a duplicate");
        };
        assert_eq!(current.status, PackageStatus::Fetched);
        assert_eq!(current.fetched_at, Some(t(10)));

        let history = repo.history_for_package(&pkg.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|h| h.event == SyncEvent::Fetch));
    }

    #[tokio::test]
    async fn test_outcome_transitions_and_rejections() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sync_packages();
        let pkg = stage_one(&repo, "esp002").await;

        // Outcome before fetch is a desync
        let early = repo
            .report_outcome("esp002", &pkg.id, true, None, t(5))
            .await
            .unwrap();
        assert!(matches!(early, OutcomeResult::NotFetched(_)));

        repo.report_fetch("esp002", &pkg.id, t(10)).await.unwrap();

        let ack = repo
            .report_outcome("esp002", &pkg.id, true, None, t(20))
            .await
            .unwrap();
        let OutcomeResult::Applied(done) = ack else {
            panic!("outcome must apply");
        };
        assert_eq!(done.status, PackageStatus::Acknowledged);

        // Terminal: a retry is benign, a contradiction changes nothing
        let dup = repo
            .report_outcome("esp002", &pkg.id, false, None, t(21))
            .await
            .unwrap();
        assert!(matches!(dup, OutcomeResult::Duplicate(_)));
        let reread = repo.get(&pkg.id).await.unwrap().unwrap();
        assert_eq!(reread.status, PackageStatus::Acknowledged);
    }

    #[tokio::test]
    async fn test_wrong_device_reports_do_not_transition() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sync_packages();
        let pkg = stage_one(&repo, "esp002").await;

        let fetched = repo.report_fetch("esp999", &pkg.id, t(10)).await.unwrap();
        assert!(matches!(fetched, FetchResult::WrongDevice(_)));
        assert_eq!(
            repo.get(&pkg.id).await.unwrap().unwrap().status,
            PackageStatus::Staged
        );
        // No history row for the impostor either
        assert!(repo.history_for_package(&pkg.id).await.unwrap().is_empty());

        assert!(matches!(
            repo.report_fetch("esp002", "no-such-package", t(11)).await.unwrap(),
            FetchResult::NotFound
        ));
    }

    #[tokio::test]
    async fn test_unfetched_package_fails_after_sync_window() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sync_packages();
        let pkg = stage_one(&repo, "esp002").await;

        // Window: anything staged at or before t(0) is overdue by t(3600)
        let expired = repo.expire_stuck(t(0), t(3600)).await.unwrap();
        assert_eq!(expired, 1);

        let failed = repo.get(&pkg.id).await.unwrap().unwrap();
        assert_eq!(failed.status, PackageStatus::Failed);
        assert_eq!(failed.resolved_at, Some(t(3600)));

        let history = repo.history_for_package(&pkg.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event, SyncEvent::Expiry);

        // And it no longer shows up to the device
        assert!(repo.list_for_device("esp002").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_restarts_clock_at_fetch() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sync_packages();
        let pkg = stage_one(&repo, "esp002").await;

        repo.report_fetch("esp002", &pkg.id, t(3000)).await.unwrap();

        // Staged at t(0) but fetched at t(3000): a cutoff of t(100)
        // doesn't touch it
        assert_eq!(repo.expire_stuck(t(100), t(3600)).await.unwrap(), 0);
        assert_eq!(
            repo.get(&pkg.id).await.unwrap().unwrap().status,
            PackageStatus::Fetched
        );
    }
}
