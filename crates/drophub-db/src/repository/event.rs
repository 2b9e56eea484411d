//! # Event Log Repository
//!
//! The system-wide audit trail. Registrations, revocations, command
//! deliveries, escalated device alerts and sweep results all get a row
//! here. Append-only.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::DbResult;
use drophub_core::{EventLogEntry, MessageSeverity};

/// Repository for the system event log.
#[derive(Debug, Clone)]
pub struct EventLogRepository {
    pool: SqlitePool,
}

impl EventLogRepository {
    /// Creates a new EventLogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        EventLogRepository { pool }
    }

    /// Records an audit event.
    ///
    /// `source` is a device id, "admin", or "system". `data` is optional
    /// structured context (JSON).
    pub async fn record(
        &self,
        event_type: &str,
        source: &str,
        message: &str,
        severity: MessageSeverity,
        data: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<EventLogEntry> {
        let entry = EventLogEntry {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            source: source.to_string(),
            message: message.to_string(),
            severity,
            data: data.map(str::to_string),
            created_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO event_log (id, event_type, source, message, severity, data, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.event_type)
        .bind(&entry.source)
        .bind(&entry.message)
        .bind(entry.severity)
        .bind(&entry.data)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(entry)
    }

    /// Recent events, newest first.
    pub async fn recent(&self, limit: i64) -> DbResult<Vec<EventLogEntry>> {
        let events = sqlx::query_as::<_, EventLogEntry>(
            r#"
            SELECT id, event_type, source, message, severity, data, created_at
            FROM event_log
            ORDER BY created_at DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Deletes events older than the cutoff (retention).
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM event_log WHERE created_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
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

    #[tokio::test]
    async fn test_record_and_recent() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.events();

        repo.record(
            "device_registered",
            "admin",
            "Device esp001 registered",
            MessageSeverity::Info,
            None,
            t(1),
        )
        .await
        .unwrap();
        repo.record(
            "command_delivered",
            "esp001",
            "Command reboot delivered",
            MessageSeverity::Info,
            Some(r#"{"command_id":"c1"}"#),
            t(2),
        )
        .await
        .unwrap();

        let events = repo.recent(10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "command_delivered");
        assert_eq!(events[1].source, "admin");
    }
}
