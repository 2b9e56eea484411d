//! # Message Repository
//!
//! Append-only log of device-originated messages. Messages are immutable
//! once created; the only lifecycle is creation and retention-based
//! pruning.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use drophub_core::{Message, MessageSeverity};

/// Repository for device message operations.
#[derive(Debug, Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    /// Creates a new MessageRepository.
    pub fn new(pool: SqlitePool) -> Self {
        MessageRepository { pool }
    }

    /// Appends a message from a device.
    pub async fn append(
        &self,
        device_id: &str,
        kind: &str,
        severity: MessageSeverity,
        content: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Message> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            kind: kind.to_string(),
            severity,
            content: content.to_string(),
            created_at: now,
        };

        debug!(device_id = %device_id, kind = %kind, severity = %severity, "Appending message");

        sqlx::query(
            r#"
            INSERT INTO messages (id, device_id, kind, severity, content, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&message.id)
        .bind(&message.device_id)
        .bind(&message.kind)
        .bind(message.severity)
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        Ok(message)
    }

    /// Recent messages for a device, newest first.
    pub async fn recent(&self, device_id: &str, limit: i64) -> DbResult<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, device_id, kind, severity, content, created_at
            FROM messages
            WHERE device_id = ?1
            ORDER BY created_at DESC
            LIMIT ?2
            "#,
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    /// Recent messages for a device at one severity, newest first.
    pub async fn recent_with_severity(
        &self,
        device_id: &str,
        severity: MessageSeverity,
        limit: i64,
    ) -> DbResult<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, device_id, kind, severity, content, created_at
            FROM messages
            WHERE device_id = ?1 AND severity = ?2
            ORDER BY created_at DESC
            LIMIT ?3
            "#,
        )
        .bind(device_id)
        .bind(severity)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    /// Counts all retained messages.
    pub async fn count_total(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Deletes messages older than the cutoff (retention).
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM messages WHERE created_at < ?1")
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
    async fn test_append_and_recent_ordering() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.messages();

        repo.append("esp001", "log", MessageSeverity::Info, "boot", t(1))
            .await
            .unwrap();
        repo.append("esp001", "error", MessageSeverity::Error, "sensor fault", t(2))
            .await
            .unwrap();
        repo.append("esp002", "log", MessageSeverity::Info, "other device", t(3))
            .await
            .unwrap();

        let recent = repo.recent("esp001", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "sensor fault");
        assert_eq!(recent[1].content, "boot");

        let errors = repo
            .recent_with_severity("esp001", MessageSeverity::Error, 10)
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);

        assert_eq!(repo.count_total().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_prune_by_age() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.messages();

        repo.append("esp001", "log", MessageSeverity::Debug, "old", t(0))
            .await
            .unwrap();
        repo.append("esp001", "log", MessageSeverity::Debug, "new", t(100))
            .await
            .unwrap();

        assert_eq!(repo.prune_before(t(50)).await.unwrap(), 1);
        let remaining = repo.recent("esp001", 10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content, "new");
    }
}
