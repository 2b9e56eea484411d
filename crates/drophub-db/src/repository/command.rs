//! # Command Repository
//!
//! Database operations for the per-device command queue.
//!
//! ## Command Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Command Lifecycle                                 │
//! │                                                                         │
//! │  1. ENQUEUE (admin)                                                    │
//! │     └── enqueue() → Command { state: Queued, seq: MAX(seq)+1 }         │
//! │                                                                         │
//! │  2. DELIVER (device poll)                                              │
//! │     └── next_pending() → candidate scan (priority DESC, seq ASC)       │
//! │     └── CAS: UPDATE ... WHERE id = ? AND state = 'queued'              │
//! │         rows_affected = 0 → lost a race, scan again                    │
//! │                                                                         │
//! │  3. COMPLETE (device report)                                           │
//! │     └── CAS: UPDATE ... WHERE id = ? AND device_id = ?                 │
//! │                            AND state = 'delivered'                     │
//! │         rows_affected = 0 → classify: missing / wrong owner /          │
//! │                            already terminal (benign) / still queued    │
//! │                                                                         │
//! │  4. EXPIRE (sweep, same CAS discipline)                                │
//! │     └── UPDATE ... WHERE state IN (...) AND expires_at <= now          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Devices retry blindly on transport failure, so a duplicate completion
//! report is an expected input, not an anomaly. The CAS guard is what
//! turns "two concurrent completes" into exactly one transition.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use drophub_core::{Command, CommandState};

// =============================================================================
// Outcome Types
// =============================================================================

/// What a completion report did.
///
/// `Duplicate` is a success from the device's point of view - the command
/// is terminal, exactly as its retry intended. Only the engine decides
/// which of the remaining variants surface as which protocol error.
#[derive(Debug, Clone)]
pub enum CompletionResult {
    /// This report performed the `delivered → completed|failed` transition.
    Applied(Command),
    /// The command was already terminal; nothing changed.
    Duplicate(Command),
    /// The command exists but was never delivered - device and hub have
    /// desynchronized.
    NotDelivered(Command),
    /// The command belongs to a different device.
    WrongDevice(Command),
    /// No such command id.
    NotFound,
}

// =============================================================================
// Command Repository
// =============================================================================

/// Repository for command queue operations.
#[derive(Debug, Clone)]
pub struct CommandRepository {
    pool: SqlitePool,
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, device_id, seq, kind, args, priority, state, created_at,
           delivered_at, completed_at, result, expires_at
    FROM commands
"#;

impl CommandRepository {
    /// Creates a new CommandRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CommandRepository { pool }
    }

    /// Gets a command by ID.
    pub async fn get(&self, command_id: &str) -> DbResult<Option<Command>> {
        let command =
            sqlx::query_as::<_, Command>(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
                .bind(command_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(command)
    }

    /// Enqueues a command for a device.
    ///
    /// ## Sequence Assignment
    /// The per-device sequence number is assigned inside the INSERT itself
    /// (`COALESCE(MAX(seq), 0) + 1` over the device's rows), so two
    /// concurrent enqueues for the same device can never claim the same
    /// seq - SQLite executes the statement atomically and the
    /// `(device_id, seq)` unique index backs it up.
    ///
    /// The caller is responsible for having checked that the device
    /// exists; this method only owns queue mechanics.
    pub async fn enqueue(
        &self,
        device_id: &str,
        kind: &str,
        args: Option<&str>,
        priority: i64,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> DbResult<Command> {
        let id = Uuid::new_v4().to_string();

        debug!(device_id = %device_id, kind = %kind, priority, "Enqueuing command");

        sqlx::query(
            r#"
            INSERT INTO commands (
                id, device_id, seq, kind, args, priority, state,
                created_at, expires_at
            )
            SELECT ?1, ?2, COALESCE(MAX(seq), 0) + 1, ?3, ?4, ?5, 'queued', ?6, ?7
            FROM commands
            WHERE device_id = ?2
            "#,
        )
        .bind(&id)
        .bind(device_id)
        .bind(kind)
        .bind(args)
        .bind(priority)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        self.get(&id)
            .await?
            .ok_or_else(|| DbError::not_found("Command", &id))
    }

    /// Delivers the next eligible command for a device, if any.
    ///
    /// ## Dispatch Order
    /// Highest priority first, then lowest seq. Commands past their TTL
    /// are skipped (the sweep will expire them) and terminal commands are
    /// never candidates.
    ///
    /// ## Atomicity
    /// The candidate read and the `queued → delivered` transition are
    /// separate statements joined by a CAS: the UPDATE re-checks
    /// `state = 'queued'`, so two concurrent polls can never both receive
    /// the same command. Losing the race just means scanning again for
    /// the next candidate.
    ///
    /// With nothing eligible this is a pure read - calling it arbitrarily
    /// often mutates nothing.
    pub async fn next_pending(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Option<Command>> {
        loop {
            let candidate = sqlx::query_as::<_, Command>(&format!(
                r#"
                {SELECT_COLUMNS}
                WHERE device_id = ?1
                  AND state = 'queued'
                  AND (expires_at IS NULL OR expires_at > ?2)
                ORDER BY priority DESC, seq ASC
                LIMIT 1
                "#
            ))
            .bind(device_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

            let Some(candidate) = candidate else {
                return Ok(None);
            };

            let rows = sqlx::query(
                r#"
                UPDATE commands SET
                    state = 'delivered',
                    delivered_at = ?2
                WHERE id = ?1 AND state = 'queued'
                "#,
            )
            .bind(&candidate.id)
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if rows == 1 {
                debug!(
                    device_id = %device_id,
                    command_id = %candidate.id,
                    seq = candidate.seq,
                    "Command delivered"
                );
                return Ok(Some(Command {
                    state: CommandState::Delivered,
                    delivered_at: Some(now),
                    ..candidate
                }));
            }

            // Lost the race to a concurrent poll or the sweep; the
            // candidate is no longer queued. Scan again.
        }
    }

    /// Applies a device's completion report.
    ///
    /// The CAS guard includes the owning device, so a report for someone
    /// else's command can never transition it. See [`CompletionResult`]
    /// for how a zero-row UPDATE is classified.
    pub async fn complete(
        &self,
        device_id: &str,
        command_id: &str,
        result: Option<&str>,
        success: bool,
        now: DateTime<Utc>,
    ) -> DbResult<CompletionResult> {
        let target = if success {
            CommandState::Completed
        } else {
            CommandState::Failed
        };

        let rows = sqlx::query(
            r#"
            UPDATE commands SET
                state = ?3,
                completed_at = ?4,
                result = ?5
            WHERE id = ?1 AND device_id = ?2 AND state = 'delivered'
            "#,
        )
        .bind(command_id)
        .bind(device_id)
        .bind(target)
        .bind(now)
        .bind(result)
        .execute(&self.pool)
        .await?
        .rows_affected();

        // Re-read either way: on success for the fresh row, on failure to
        // find out what actually stopped the transition.
        let Some(command) = self.get(command_id).await? else {
            return Ok(CompletionResult::NotFound);
        };

        if rows == 1 {
            debug!(command_id = %command_id, state = %command.state, "Command completed");
            return Ok(CompletionResult::Applied(command));
        }

        if command.device_id != device_id {
            Ok(CompletionResult::WrongDevice(command))
        } else if command.state.is_terminal() {
            Ok(CompletionResult::Duplicate(command))
        } else {
            // Still queued: the device claims delivery the hub never made
            Ok(CompletionResult::NotDelivered(command))
        }
    }

    /// Expires commands whose TTL deadline has passed.
    ///
    /// Runs with the same CAS discipline as live requests (the state
    /// filter is part of the UPDATE), so a completion landing concurrently
    /// wins or loses atomically - never both.
    ///
    /// `expire_delivered` gates whether in-flight (`delivered`) commands
    /// are swept too; a delivered command the device is still chewing on
    /// is otherwise left alone.
    pub async fn expire_due(
        &self,
        now: DateTime<Utc>,
        expire_delivered: bool,
    ) -> DbResult<u64> {
        let rows = if expire_delivered {
            sqlx::query(
                r#"
                UPDATE commands SET state = 'expired'
                WHERE state IN ('queued', 'delivered')
                  AND expires_at IS NOT NULL AND expires_at <= ?1
                "#,
            )
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                r#"
                UPDATE commands SET state = 'expired'
                WHERE state = 'queued'
                  AND expires_at IS NOT NULL AND expires_at <= ?1
                "#,
            )
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected()
        };

        Ok(rows)
    }

    /// Command history for a device, newest first.
    pub async fn history(&self, device_id: &str, limit: i64) -> DbResult<Vec<Command>> {
        let commands = sqlx::query_as::<_, Command>(&format!(
            "{SELECT_COLUMNS} WHERE device_id = ?1 ORDER BY seq DESC LIMIT ?2"
        ))
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(commands)
    }

    /// Counts non-terminal commands for one device.
    pub async fn queue_depth(&self, device_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM commands WHERE device_id = ?1 AND state IN ('queued', 'delivered')",
        )
        .bind(device_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Counts commands in a given state across all devices.
    pub async fn count_in_state(&self, state: CommandState) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM commands WHERE state = ?1")
            .bind(state)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Deletes terminal commands older than the cutoff (retention).
    ///
    /// Only terminal rows are candidates, so pruning can never disturb
    /// the ordering of commands still in the queue.
    pub async fn prune_terminal(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM commands
            WHERE state IN ('completed', 'failed', 'expired')
              AND created_at < ?1
            "#,
        )
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

    async fn test_db() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.devices()
            .create("esp001", "Test device", "esp8266", "hash", t(0))
            .await
            .unwrap();
        db
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[tokio::test]
    async fn test_sequence_numbers_are_monotonic() {
        let db = test_db().await;
        let repo = db.commands();

        let c1 = repo.enqueue("esp001", "reboot", None, 0, None, t(1)).await.unwrap();
        let c2 = repo.enqueue("esp001", "status", None, 0, None, t(2)).await.unwrap();
        let c3 = repo.enqueue("esp001", "blink", None, 0, None, t(3)).await.unwrap();

        assert_eq!((c1.seq, c2.seq, c3.seq), (1, 2, 3));
        assert_eq!(c1.state, CommandState::Queued);
    }

    #[tokio::test]
    async fn test_sequences_are_per_device() {
        let db = test_db().await;
        db.devices()
            .create("esp002", "Other", "esp8266", "hash2", t(0))
            .await
            .unwrap();
        let repo = db.commands();

        let a = repo.enqueue("esp001", "reboot", None, 0, None, t(1)).await.unwrap();
        let b = repo.enqueue("esp002", "reboot", None, 0, None, t(1)).await.unwrap();

        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 1);
    }

    #[tokio::test]
    async fn test_empty_poll_is_a_pure_noop() {
        let db = test_db().await;
        let repo = db.commands();

        for _ in 0..5 {
            assert!(repo.next_pending("esp001", t(1)).await.unwrap().is_none());
        }
        assert_eq!(repo.queue_depth("esp001").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_order_priority_then_seq() {
        let db = test_db().await;
        let repo = db.commands();

        // c1 (priority 1), c2 (priority 5), c3 (priority 1)
        let c1 = repo.enqueue("esp001", "c1", None, 1, None, t(1)).await.unwrap();
        let c2 = repo.enqueue("esp001", "c2", None, 5, None, t(2)).await.unwrap();
        let c3 = repo.enqueue("esp001", "c3", None, 1, None, t(3)).await.unwrap();

        let first = repo.next_pending("esp001", t(4)).await.unwrap().unwrap();
        let second = repo.next_pending("esp001", t(5)).await.unwrap().unwrap();
        let third = repo.next_pending("esp001", t(6)).await.unwrap().unwrap();

        assert_eq!(first.id, c2.id);
        assert_eq!(second.id, c1.id);
        assert_eq!(third.id, c3.id);
        assert!(repo.next_pending("esp001", t(7)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delivery_records_state_and_timestamp() {
        let db = test_db().await;
        let repo = db.commands();

        repo.enqueue("esp001", "reboot", None, 0, None, t(1)).await.unwrap();
        let delivered = repo.next_pending("esp001", t(2)).await.unwrap().unwrap();

        assert_eq!(delivered.state, CommandState::Delivered);
        assert_eq!(delivered.delivered_at, Some(t(2)));

        // Durable: a fresh read agrees
        let reread = repo.get(&delivered.id).await.unwrap().unwrap();
        assert_eq!(reread.state, CommandState::Delivered);
    }

    #[tokio::test]
    async fn test_complete_and_benign_duplicate() {
        let db = test_db().await;
        let repo = db.commands();

        repo.enqueue("esp001", "reboot", None, 1, None, t(1)).await.unwrap();
        let cmd = repo.next_pending("esp001", t(2)).await.unwrap().unwrap();

        let first = repo
            .complete("esp001", &cmd.id, Some("ok"), true, t(3))
            .await
            .unwrap();
        let CompletionResult::Applied(done) = first else {
            panic!("first completion must apply");
        };
        assert_eq!(done.state, CommandState::Completed);
        assert_eq!(done.result.as_deref(), Some("ok"));

        // Blind retry with identical arguments: no transition, no error
        let second = repo
            .complete("esp001", &cmd.id, Some("ok"), true, t(4))
            .await
            .unwrap();
        let CompletionResult::Duplicate(still) = second else {
            panic!("second completion must be a duplicate");
        };
        assert_eq!(still.state, CommandState::Completed);
        assert_eq!(still.completed_at, Some(t(3)));
    }

    #[tokio::test]
    async fn test_complete_failure_report() {
        let db = test_db().await;
        let repo = db.commands();

        repo.enqueue("esp001", "ota", None, 0, None, t(1)).await.unwrap();
        let cmd = repo.next_pending("esp001", t(2)).await.unwrap().unwrap();

        let outcome = repo
            .complete("esp001", &cmd.id, Some("flash error"), false, t(3))
            .await
            .unwrap();
        let CompletionResult::Applied(failed) = outcome else {
            panic!("failure report must apply");
        };
        assert_eq!(failed.state, CommandState::Failed);
    }

    #[tokio::test]
    async fn test_complete_rejects_undelivered_and_foreign() {
        let db = test_db().await;
        db.devices()
            .create("esp002", "Other", "esp8266", "hash2", t(0))
            .await
            .unwrap();
        let repo = db.commands();

        let queued = repo.enqueue("esp001", "reboot", None, 0, None, t(1)).await.unwrap();

        // Completion for a command never handed out
        let outcome = repo
            .complete("esp001", &queued.id, None, true, t(2))
            .await
            .unwrap();
        assert!(matches!(outcome, CompletionResult::NotDelivered(_)));

        // Deliver to esp001, then esp002 tries to claim it
        let cmd = repo.next_pending("esp001", t(3)).await.unwrap().unwrap();
        let outcome = repo
            .complete("esp002", &cmd.id, None, true, t(4))
            .await
            .unwrap();
        assert!(matches!(outcome, CompletionResult::WrongDevice(_)));

        // The foreign report must not have transitioned anything
        let reread = repo.get(&cmd.id).await.unwrap().unwrap();
        assert_eq!(reread.state, CommandState::Delivered);

        // Unknown id
        let outcome = repo
            .complete("esp001", "no-such-id", None, true, t(5))
            .await
            .unwrap();
        assert!(matches!(outcome, CompletionResult::NotFound));
    }

    #[tokio::test]
    async fn test_expired_queued_command_is_never_delivered() {
        let db = test_db().await;
        let repo = db.commands();

        repo.enqueue("esp001", "reboot", None, 0, Some(t(10)), t(1))
            .await
            .unwrap();

        // Past the deadline the poll skips it even before any sweep ran
        assert!(repo.next_pending("esp001", t(11)).await.unwrap().is_none());

        // And the sweep makes the expiry durable
        let swept = repo.expire_due(t(11), false).await.unwrap();
        assert_eq!(swept, 1);
        assert_eq!(
            repo.count_in_state(CommandState::Expired).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_delivered_expiry_is_policy_gated() {
        let db = test_db().await;
        let repo = db.commands();

        repo.enqueue("esp001", "slow-job", None, 0, Some(t(10)), t(1))
            .await
            .unwrap();
        let cmd = repo.next_pending("esp001", t(2)).await.unwrap().unwrap();

        // Default policy: in-flight commands are not swept
        assert_eq!(repo.expire_due(t(20), false).await.unwrap(), 0);
        assert_eq!(
            repo.get(&cmd.id).await.unwrap().unwrap().state,
            CommandState::Delivered
        );

        // Opt-in policy sweeps them
        assert_eq!(repo.expire_due(t(20), true).await.unwrap(), 1);
        let expired = repo.get(&cmd.id).await.unwrap().unwrap();
        assert_eq!(expired.state, CommandState::Expired);

        // And a late completion report is a desync, not a transition
        let outcome = repo
            .complete("esp001", &cmd.id, None, true, t(21))
            .await
            .unwrap();
        assert!(matches!(outcome, CompletionResult::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_sweep_does_not_steal_a_completion() {
        let db = test_db().await;
        let repo = db.commands();

        repo.enqueue("esp001", "reboot", None, 0, Some(t(10)), t(1))
            .await
            .unwrap();
        let cmd = repo.next_pending("esp001", t(2)).await.unwrap().unwrap();

        // Completion lands first; the sweep then finds nothing to expire
        repo.complete("esp001", &cmd.id, None, true, t(9)).await.unwrap();
        assert_eq!(repo.expire_due(t(20), true).await.unwrap(), 0);
        assert_eq!(
            repo.get(&cmd.id).await.unwrap().unwrap().state,
            CommandState::Completed
        );
    }

    #[tokio::test]
    async fn test_prune_spares_non_terminal() {
        let db = test_db().await;
        let repo = db.commands();

        repo.enqueue("esp001", "old-done", None, 0, None, t(1)).await.unwrap();
        let done = repo.next_pending("esp001", t(2)).await.unwrap().unwrap();
        repo.complete("esp001", &done.id, None, true, t(3)).await.unwrap();

        repo.enqueue("esp001", "still-queued", None, 0, None, t(4)).await.unwrap();

        let pruned = repo.prune_terminal(t(100)).await.unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(repo.queue_depth("esp001").await.unwrap(), 1);

        // Ordering of the survivors is untouched: next enqueue continues
        // the sequence
        let next = repo.enqueue("esp001", "after-prune", None, 0, None, t(5)).await.unwrap();
        assert_eq!(next.seq, 3);
    }
}
