//! # Notification Repository
//!
//! Notification storage and the dispatch outbox.
//!
//! ## Outbox Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  order/delivery/payment repo                                            │
//! │      └── insert_notification(..)      same transaction as the change    │
//! │                   │                                                     │
//! │                   ▼                                                     │
//! │  notifications (dispatched_at IS NULL = pending)                        │
//! │                   │                                                     │
//! │                   ▼                                                     │
//! │  relay: list_pending ──► sink ──► mark_dispatched                       │
//! │                            └─ on error: record_failure (attempts + 1)   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The insert rides in the caller's transaction, so a notification exists
//! exactly when the change it announces committed. Dispatch is best-effort
//! and retried; rows past the attempt cap are left for inspection.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use meridian_core::{NewNotification, Notification};

const SELECT_COLUMNS: &str = "id, user_id, kind, title, message, order_id, priority, \
     is_read, read_at, dispatched_at, attempts, last_error, created_at";

/// Inserts a notification on an existing connection, so repositories can
/// write it in the same transaction as the change that triggered it.
pub(crate) async fn insert_notification(
    conn: &mut sqlx::SqliteConnection,
    new: &NewNotification,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO notifications (
            id, user_id, kind, title, message, order_id, priority,
            is_read, read_at, dispatched_at, attempts, last_error, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL, NULL, 0, NULL, ?8)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&new.user_id)
    .bind(new.kind)
    .bind(&new.title)
    .bind(&new.message)
    .bind(&new.order_id)
    .bind(new.priority)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

/// Repository for notification database operations.
#[derive(Debug, Clone)]
pub struct NotificationRepository {
    pool: SqlitePool,
}

impl NotificationRepository {
    /// Creates a new NotificationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        NotificationRepository { pool }
    }

    /// Queues a standalone notification, outside any transaction.
    pub async fn enqueue(&self, new: &NewNotification) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_notification(&mut conn, new, Utc::now()).await
    }

    // -------------------------------------------------------------------------
    // Outbox side (relay)
    // -------------------------------------------------------------------------

    /// Undispatched notifications with attempts left, oldest first.
    pub async fn list_pending(&self, max_attempts: i64, limit: u32) -> DbResult<Vec<Notification>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM notifications \
             WHERE dispatched_at IS NULL AND attempts < ?1 \
             ORDER BY created_at ASC LIMIT ?2"
        );
        let notifications = sqlx::query_as::<_, Notification>(&sql)
            .bind(max_attempts)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(notifications)
    }

    /// Notifications still waiting for dispatch, regardless of attempts.
    pub async fn pending_count(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE dispatched_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Marks a notification as handed to a sink.
    pub async fn mark_dispatched(&self, id: &str) -> DbResult<()> {
        let result =
            sqlx::query("UPDATE notifications SET dispatched_at = ?2 WHERE id = ?1")
                .bind(id)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Notification", id));
        }
        Ok(())
    }

    /// Records a failed dispatch attempt.
    pub async fn record_failure(&self, id: &str, error: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE notifications SET attempts = attempts + 1, last_error = ?2 WHERE id = ?1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Notification", id));
        }
        debug!(notification_id = %id, error = %error, "Notification dispatch failed");
        Ok(())
    }

    /// Deletes dispatched notifications older than the cutoff. Returns how
    /// many rows went away.
    pub async fn purge_dispatched(&self, older_than: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM notifications \
             WHERE dispatched_at IS NOT NULL AND dispatched_at < ?1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // -------------------------------------------------------------------------
    // User side
    // -------------------------------------------------------------------------

    /// A user's notifications, newest first.
    pub async fn list_for_user(&self, user_id: &str, limit: u32) -> DbResult<Vec<Notification>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM notifications \
             WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2"
        );
        let notifications = sqlx::query_as::<_, Notification>(&sql)
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(notifications)
    }

    pub async fn unread_count(&self, user_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Marks a notification read. Reading twice keeps the first timestamp.
    pub async fn mark_read(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = 1, read_at = COALESCE(read_at, ?2) \
             WHERE id = ?1",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Notification", id));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
