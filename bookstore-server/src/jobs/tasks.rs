//! Task types and payloads
//!
//! Type strings are part of the operational surface; keep them verbatim.

use super::{EnqueueOptions, JobResult, NewTask, Queue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod task_types {
    pub const AUTO_RELEASE_RESERVATION: &str = "cart:auto_release_reservation";
    pub const RELEASE_EXPIRED_RESERVATIONS: &str = "cart:release_expired_reservations";
    pub const REMOVE_EXPIRED_PROMOTIONS: &str = "cart:remove_expired_promotions";
    pub const SEND_ORDER_CONFIRMATION: &str = "order:send_order_confirmation";
    pub const TRACK_CHECKOUT: &str = "order:track_checkout";
    pub const SYNC_BOOK_STOCK: &str = "inventory:sync_book_stock";
    pub const EMAIL_VERIFICATION: &str = "email:verification";
    pub const CLEANUP_EXPIRED_TOKENS: &str = "auth:cleanup_expired_tokens";
    pub const NOTIFICATION_SEND_PENDING: &str = "notification:send_pending";
    pub const NOTIFICATION_RETRY_FAILED: &str = "notification:retry_failed";
    pub const NOTIFICATION_CLEANUP_OLD: &str = "notification:cleanup_old";
    pub const EXECUTE_REFUND: &str = "payment:execute_refund";
}

use task_types::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPayload {
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookPayload {
    pub book_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPayload {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundPayload {
    pub refund_id: String,
}

/// Batch tasks; `None` uses the handler's configured default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPayload {
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Dedup key of an order's auto-release timer
pub fn auto_release_key(order_id: &str) -> String {
    order_id.to_string()
}

fn order_payload(order_id: &str) -> OrderPayload {
    OrderPayload {
        order_id: order_id.to_string(),
    }
}

/// Release an unpaid order's stock at `not_before`. Cancelled by key when
/// the payment succeeds.
pub fn auto_release_reservation(order_id: &str, not_before: i64) -> JobResult<NewTask> {
    NewTask::new(
        AUTO_RELEASE_RESERVATION,
        &order_payload(order_id),
        EnqueueOptions::default()
            .queue(Queue::Default)
            .not_before(not_before)
            .dedup_key(auto_release_key(order_id)),
    )
}

pub fn send_order_confirmation(order_id: &str) -> JobResult<NewTask> {
    NewTask::new(
        SEND_ORDER_CONFIRMATION,
        &order_payload(order_id),
        EnqueueOptions::default()
            .queue(Queue::High)
            .timeout(Duration::from_secs(60))
            .dedup_key(format!("confirm:{order_id}")),
    )
}

pub fn track_checkout(order_id: &str) -> JobResult<NewTask> {
    NewTask::new(
        TRACK_CHECKOUT,
        &order_payload(order_id),
        EnqueueOptions::default().queue(Queue::Low),
    )
}

pub fn sync_book_stock(book_id: &str) -> JobResult<NewTask> {
    NewTask::new(
        SYNC_BOOK_STOCK,
        &BookPayload {
            book_id: book_id.to_string(),
        },
        EnqueueOptions::default()
            .queue(Queue::Low)
            .dedup_key(format!("stock:{book_id}")),
    )
}

pub fn email_verification(user_id: &str) -> JobResult<NewTask> {
    NewTask::new(
        EMAIL_VERIFICATION,
        &UserPayload {
            user_id: user_id.to_string(),
        },
        EnqueueOptions::default()
            .queue(Queue::Auth)
            .timeout(Duration::from_secs(60)),
    )
}

pub fn execute_refund(refund_id: &str) -> JobResult<NewTask> {
    NewTask::new(
        EXECUTE_REFUND,
        &RefundPayload {
            refund_id: refund_id.to_string(),
        },
        EnqueueOptions::default()
            .queue(Queue::High)
            .max_retry(5)
            .dedup_key(format!("refund:{refund_id}")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_release_is_delayed_and_keyed_by_order() {
        let task = auto_release_reservation("o1", 1_000).unwrap();
        assert_eq!(task.task_type, "cart:auto_release_reservation");
        assert_eq!(task.options.not_before, Some(1_000));
        assert_eq!(task.options.dedup_key.as_deref(), Some("o1"));
        assert_eq!(task.payload, serde_json::json!({"order_id": "o1"}));
    }

    #[test]
    fn verification_mail_runs_on_the_auth_queue() {
        let task = email_verification("u1").unwrap();
        assert_eq!(task.task_type, "email:verification");
        assert_eq!(task.options.queue, Queue::Auth);
        assert_eq!(task.options.dedup_key, None);
    }

    #[test]
    fn batch_payload_defaults_limit() {
        let p: BatchPayload = serde_json::from_str("{}").unwrap();
        assert_eq!(p.limit, None);
    }
}
