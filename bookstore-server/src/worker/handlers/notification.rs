//! Outbox delivery
//!
//! A row that fails to deliver never fails the task: it is marked `failed`
//! with a backoff (or `exhausted`) and picked up by `notification:retry_failed`.

use super::HandlerDeps;
use crate::context::RequestContext;
use crate::db::repository::notifications::{self, Notification};
use crate::db::repository::users;
use crate::jobs::{BatchPayload, Job, task_types};
use crate::notify::{NotifyError, templates};
use crate::worker::{HandlerResult, TaskHandler};
use async_trait::async_trait;
use shared::util::now_millis;
use std::collections::HashMap;

const DEFAULT_BATCH: i64 = 100;
const RETENTION_MS: i64 = 30 * 24 * 60 * 60 * 1000;

#[derive(Debug, Default, Clone, Copy)]
struct Delivered {
    sent: u32,
    failed: u32,
    exhausted: u32,
}

async fn deliver(deps: &HandlerDeps, n: &Notification, tally: &mut Delivered) -> HandlerResult {
    let attempt: Result<String, NotifyError> = async {
        let user = users::find_by_id(&deps.pool, &n.user_id)
            .await?
            .ok_or_else(|| NotifyError::Rejected(format!("user {} not found", n.user_id)))?;
        let email = templates::render(&n.template, &n.data)?;
        deps.send_email(&user.email, &email).await
    }
    .await;

    let now = now_millis();
    match attempt {
        Ok(message_id) => {
            notifications::mark_sent(&deps.pool, &n.id, now).await?;
            tracing::debug!(notification_id = %n.id, message_id, "Notification delivered");
            tally.sent += 1;
        }
        Err(e) if e.is_retryable() => {
            let exhausted = notifications::mark_failed(&deps.pool, n, &e.to_string(), now).await?;
            tracing::warn!(notification_id = %n.id, attempts = n.attempts + 1, exhausted, error = %e, "Notification delivery failed");
            if exhausted {
                tally.exhausted += 1;
            } else {
                tally.failed += 1;
            }
        }
        Err(e) => {
            notifications::mark_exhausted(&deps.pool, &n.id, &e.to_string()).await?;
            tracing::warn!(notification_id = %n.id, error = %e, "Notification undeliverable");
            tally.exhausted += 1;
        }
    }
    Ok(())
}

/// `notification:send_pending`
pub struct SendPendingNotifications(pub HandlerDeps);

#[async_trait]
impl TaskHandler for SendPendingNotifications {
    fn task_type(&self) -> &'static str {
        task_types::NOTIFICATION_SEND_PENDING
    }

    async fn handle(&self, job: &Job, ctx: &RequestContext) -> HandlerResult {
        let deps = &self.0;
        let payload: BatchPayload = job.decode()?;
        let batch = notifications::pending_batch(&deps.pool, payload.limit.unwrap_or(DEFAULT_BATCH)).await?;

        let cap = deps.notification_user_rate_cap.max(1);
        let mut per_user: HashMap<&str, usize> = HashMap::new();
        let mut tally = Delivered::default();
        let mut deferred = 0u32;
        for n in &batch {
            if ctx.is_expired() {
                break;
            }
            let count = per_user.entry(n.user_id.as_str()).or_default();
            if *count >= cap {
                // stays pending for the next run
                deferred += 1;
                continue;
            }
            *count += 1;
            deliver(deps, n, &mut tally).await?;
        }

        if !batch.is_empty() {
            tracing::info!(
                sent = tally.sent,
                failed = tally.failed,
                exhausted = tally.exhausted,
                deferred,
                "Pending notifications dispatched"
            );
        }
        Ok(())
    }
}

/// `notification:retry_failed`
pub struct RetryFailedNotifications(pub HandlerDeps);

#[async_trait]
impl TaskHandler for RetryFailedNotifications {
    fn task_type(&self) -> &'static str {
        task_types::NOTIFICATION_RETRY_FAILED
    }

    async fn handle(&self, job: &Job, ctx: &RequestContext) -> HandlerResult {
        let deps = &self.0;
        let payload: BatchPayload = job.decode()?;
        let due = notifications::due_failed(&deps.pool, now_millis(), payload.limit.unwrap_or(DEFAULT_BATCH)).await?;

        let mut tally = Delivered::default();
        for n in &due {
            if ctx.is_expired() {
                break;
            }
            deliver(deps, n, &mut tally).await?;
        }

        if !due.is_empty() {
            tracing::info!(
                sent = tally.sent,
                failed = tally.failed,
                exhausted = tally.exhausted,
                "Failed notifications retried"
            );
        }
        Ok(())
    }
}

/// `notification:cleanup_old`
pub struct CleanupOldNotifications(pub HandlerDeps);

#[async_trait]
impl TaskHandler for CleanupOldNotifications {
    fn task_type(&self) -> &'static str {
        task_types::NOTIFICATION_CLEANUP_OLD
    }

    async fn handle(&self, _job: &Job, _ctx: &RequestContext) -> HandlerResult {
        let deleted = notifications::cleanup_old(&self.0.pool, now_millis() - RETENTION_MS).await?;
        tracing::info!(deleted, "Old notifications removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::test_support::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    async fn queue(pool: &sqlx::SqlitePool, user: &str, created_at: i64) -> String {
        notifications::enqueue(pool, user, templates::PROMOTION_REMOVED, &json!({"code": "OLD"}), created_at)
            .await
            .unwrap()
    }

    async fn status(pool: &sqlx::SqlitePool, id: &str) -> String {
        notifications::find_by_id(pool, id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn pending_rows_respect_the_per_user_cap() {
        let db = memory_db().await;
        seed_user(&db.pool, "u1").await;
        seed_user(&db.pool, "u2").await;
        let mut ids = Vec::new();
        for i in 0..7 {
            ids.push(queue(&db.pool, "u1", i).await);
        }
        let other = queue(&db.pool, "u2", 10).await;
        let sender = Arc::new(RecordingSender::default());

        // cap is 5 per user per run
        let job = job(task_types::NOTIFICATION_SEND_PENDING, json!({}));
        SendPendingNotifications(deps(&db, sender.clone()))
            .handle(&job, &ctx())
            .await
            .unwrap();

        assert_eq!(sender.sent_to().len(), 6);
        assert_eq!(status(&db.pool, &ids[4]).await, "sent");
        assert_eq!(status(&db.pool, &ids[5]).await, "pending");
        assert_eq!(status(&db.pool, &other).await, "sent");
    }

    #[tokio::test]
    async fn outage_marks_rows_failed_and_retry_delivers_them() {
        let db = memory_db().await;
        seed_user(&db.pool, "u1").await;
        let id = queue(&db.pool, "u1", 0).await;
        let sender = Arc::new(RecordingSender::default());
        sender.down.store(true, Ordering::SeqCst);
        let deps = deps(&db, sender.clone());

        SendPendingNotifications(deps.clone())
            .handle(&job(task_types::NOTIFICATION_SEND_PENDING, json!({})), &ctx())
            .await
            .unwrap();
        let row = notifications::find_by_id(&db.pool, &id).await.unwrap().unwrap();
        assert_eq!(row.status, "failed");
        assert_eq!(row.attempts, 1);
        assert!(row.next_retry_at.unwrap() > now_millis());

        // not due yet
        let retry = job(task_types::NOTIFICATION_RETRY_FAILED, json!({}));
        sender.down.store(false, Ordering::SeqCst);
        RetryFailedNotifications(deps.clone()).handle(&retry, &ctx()).await.unwrap();
        assert_eq!(status(&db.pool, &id).await, "failed");

        sqlx::query("UPDATE notifications SET next_retry_at = 0")
            .execute(&db.pool)
            .await
            .unwrap();
        RetryFailedNotifications(deps).handle(&retry, &ctx()).await.unwrap();
        assert_eq!(status(&db.pool, &id).await, "sent");
        assert_eq!(sender.sent_to(), vec!["u1@example.test"]);
    }

    #[tokio::test]
    async fn unknown_recipient_is_given_up() {
        let db = memory_db().await;
        let id = queue(&db.pool, "ghost", 0).await;

        SendPendingNotifications(deps(&db, Arc::default()))
            .handle(&job(task_types::NOTIFICATION_SEND_PENDING, json!({})), &ctx())
            .await
            .unwrap();
        assert_eq!(status(&db.pool, &id).await, "exhausted");
    }

    #[tokio::test]
    async fn cleanup_keeps_recent_and_undelivered_rows() {
        let db = memory_db().await;
        seed_user(&db.pool, "u1").await;
        let old_sent = queue(&db.pool, "u1", 0).await;
        let old_pending = queue(&db.pool, "u1", 0).await;
        let recent_sent = queue(&db.pool, "u1", now_millis()).await;
        notifications::mark_sent(&db.pool, &old_sent, 1).await.unwrap();
        notifications::mark_sent(&db.pool, &recent_sent, now_millis()).await.unwrap();

        CleanupOldNotifications(deps(&db, Arc::default()))
            .handle(&job(task_types::NOTIFICATION_CLEANUP_OLD, json!({})), &ctx())
            .await
            .unwrap();

        assert!(notifications::find_by_id(&db.pool, &old_sent).await.unwrap().is_none());
        assert!(notifications::find_by_id(&db.pool, &old_pending).await.unwrap().is_some());
        assert!(notifications::find_by_id(&db.pool, &recent_sent).await.unwrap().is_some());
    }
}
