//! Notification Outbox Repository
//!
//! Rows are written by producers (promotion sweep, order flows) and drained
//! by the `notification:*` tasks.

use super::{RepoError, RepoResult};
use serde_json::Value;
use sqlx::SqlitePool;

/// Delivery attempts before a row is given up
pub const DEFAULT_MAX_ATTEMPTS: i64 = 5;

/// Base delay between redelivery attempts
const RETRY_BASE_MS: i64 = 60_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub template: String,
    pub data: Value,
    pub status: String,
    pub attempts: i64,
    pub max_attempts: i64,
    pub next_retry_at: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub sent_at: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: String,
    user_id: String,
    template: String,
    data: String,
    status: String,
    attempts: i64,
    max_attempts: i64,
    next_retry_at: Option<i64>,
    last_error: Option<String>,
    created_at: i64,
    sent_at: Option<i64>,
}

impl NotificationRow {
    fn into_model(self) -> RepoResult<Notification> {
        let data = serde_json::from_str(&self.data)
            .map_err(|e| RepoError::Database(format!("Invalid notification data: {e}")))?;
        Ok(Notification {
            id: self.id,
            user_id: self.user_id,
            template: self.template,
            data,
            status: self.status,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            next_retry_at: self.next_retry_at,
            last_error: self.last_error,
            created_at: self.created_at,
            sent_at: self.sent_at,
        })
    }
}

const COLUMNS: &str = "id, user_id, template, data, status, attempts, max_attempts, next_retry_at, \
                       last_error, created_at, sent_at";

/// Delay before the next attempt after `attempts` failures: 1m, 2m, 4m, ...
pub fn retry_delay_ms(attempts: i64) -> i64 {
    let exp = (attempts.max(1) - 1).min(20) as u32;
    RETRY_BASE_MS.saturating_mul(1_i64 << exp)
}

pub async fn enqueue(
    pool: &SqlitePool,
    user_id: &str,
    template: &str,
    data: &Value,
    now: i64,
) -> RepoResult<String> {
    let id = shared::util::new_id();
    sqlx::query(
        "INSERT INTO notifications (id, user_id, template, data, status, attempts, max_attempts, created_at)
         VALUES (?, ?, ?, ?, 'pending', 0, ?, ?)",
    )
    .bind(&id)
    .bind(user_id)
    .bind(template)
    .bind(data.to_string())
    .bind(DEFAULT_MAX_ATTEMPTS)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn find_by_id(pool: &SqlitePool, id: &str) -> RepoResult<Option<Notification>> {
    let row = sqlx::query_as::<_, NotificationRow>(&format!(
        "SELECT {COLUMNS} FROM notifications WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(NotificationRow::into_model).transpose()
}

/// Oldest pending rows first
pub async fn pending_batch(pool: &SqlitePool, limit: i64) -> RepoResult<Vec<Notification>> {
    let rows = sqlx::query_as::<_, NotificationRow>(&format!(
        "SELECT {COLUMNS} FROM notifications WHERE status = 'pending'
         ORDER BY created_at, id LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(NotificationRow::into_model).collect()
}

/// Failed rows whose retry time has come
pub async fn due_failed(pool: &SqlitePool, now: i64, limit: i64) -> RepoResult<Vec<Notification>> {
    let rows = sqlx::query_as::<_, NotificationRow>(&format!(
        "SELECT {COLUMNS} FROM notifications
         WHERE status = 'failed' AND next_retry_at <= ?
         ORDER BY next_retry_at, id LIMIT ?"
    ))
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(NotificationRow::into_model).collect()
}

pub async fn mark_sent(pool: &SqlitePool, id: &str, now: i64) -> RepoResult<()> {
    sqlx::query(
        "UPDATE notifications SET status = 'sent', attempts = attempts + 1, sent_at = ?, last_error = NULL
         WHERE id = ?",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a failed attempt. Returns true when the row is now exhausted.
pub async fn mark_failed(pool: &SqlitePool, n: &Notification, error: &str, now: i64) -> RepoResult<bool> {
    let attempts = n.attempts + 1;
    let exhausted = attempts >= n.max_attempts;
    let (status, next_retry_at) = if exhausted {
        ("exhausted", None)
    } else {
        ("failed", Some(now + retry_delay_ms(attempts)))
    };

    sqlx::query(
        "UPDATE notifications SET status = ?, attempts = ?, next_retry_at = ?, last_error = ? WHERE id = ?",
    )
    .bind(status)
    .bind(attempts)
    .bind(next_retry_at)
    .bind(error)
    .bind(&n.id)
    .execute(pool)
    .await?;
    Ok(exhausted)
}

/// Give up on a row that can never be delivered
pub async fn mark_exhausted(pool: &SqlitePool, id: &str, error: &str) -> RepoResult<()> {
    sqlx::query(
        "UPDATE notifications SET status = 'exhausted', attempts = attempts + 1, next_retry_at = NULL, last_error = ?
         WHERE id = ?",
    )
    .bind(error)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete sent or exhausted rows created before `cutoff`
pub async fn cleanup_old(pool: &SqlitePool, cutoff: i64) -> RepoResult<u64> {
    let rows = sqlx::query(
        "DELETE FROM notifications WHERE status IN ('sent', 'exhausted') AND created_at < ?",
    )
    .bind(cutoff)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows)
}
