//! Checkout analytics events

use super::RepoResult;
use rust_decimal::Decimal;
use sqlx::SqlitePool;

/// Record the checkout once. Returns false when the event already exists.
pub async fn record_once(
    pool: &SqlitePool,
    order_id: &str,
    user_id: &str,
    item_count: i64,
    total: Decimal,
    now: i64,
) -> RepoResult<bool> {
    let rows = sqlx::query(
        "INSERT INTO checkout_events (order_id, user_id, item_count, total, created_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (order_id) DO NOTHING",
    )
    .bind(order_id)
    .bind(user_id)
    .bind(item_count)
    .bind(total.to_string())
    .bind(now)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

pub async fn count_for_order(pool: &SqlitePool, order_id: &str) -> RepoResult<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM checkout_events WHERE order_id = ?")
        .bind(order_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
