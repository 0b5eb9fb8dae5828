//! Order Repository

use super::{RepoError, RepoResult, bad_enum, parse_decimal};
use shared::models::{Order, OrderItem, OrderStatus, OrderStatusChange};
use sqlx::{SqliteConnection, SqlitePool};

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: String,
    order_number: String,
    user_id: String,
    status: String,
    subtotal: String,
    discount: String,
    shipping_fee: String,
    total: String,
    promotion_id: Option<String>,
    shipping_address: String,
    version: i64,
    created_at: i64,
    updated_at: i64,
}

impl OrderRow {
    fn into_model(self, items: Vec<OrderItem>) -> RepoResult<Order> {
        let status =
            OrderStatus::from_db(&self.status).ok_or_else(|| bad_enum("orders.status", &self.status))?;
        let shipping_address = serde_json::from_str(&self.shipping_address)
            .map_err(|e| RepoError::Database(format!("Invalid shipping address JSON: {e}")))?;
        Ok(Order {
            subtotal: parse_decimal(&self.subtotal, "orders.subtotal")?,
            discount: parse_decimal(&self.discount, "orders.discount")?,
            shipping_fee: parse_decimal(&self.shipping_fee, "orders.shipping_fee")?,
            total: parse_decimal(&self.total, "orders.total")?,
            id: self.id,
            order_number: self.order_number,
            user_id: self.user_id,
            status,
            promotion_id: self.promotion_id,
            shipping_address,
            items,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    order_id: String,
    book_id: String,
    quantity: i64,
    unit_price: String,
    warehouse_id: String,
}

impl OrderItemRow {
    fn into_model(self) -> RepoResult<OrderItem> {
        Ok(OrderItem {
            unit_price: parse_decimal(&self.unit_price, "order_items.unit_price")?,
            order_id: self.order_id,
            book_id: self.book_id,
            quantity: self.quantity,
            warehouse_id: self.warehouse_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    order_id: String,
    from_status: Option<String>,
    to_status: String,
    actor: String,
    reason: Option<String>,
    created_at: i64,
}

/// Next human order number, e.g. `BK20260115-000042`
pub async fn next_order_number(conn: &mut SqliteConnection, now: i64) -> RepoResult<String> {
    let (seq,): (i64,) =
        sqlx::query_as("UPDATE order_sequence SET value = value + 1 WHERE id = 1 RETURNING value")
            .fetch_one(conn)
            .await?;
    let date = chrono::DateTime::from_timestamp_millis(now)
        .map(|dt| dt.format("%Y%m%d").to_string())
        .unwrap_or_else(|| "00000000".into());
    Ok(format!("BK{date}-{seq:06}"))
}

pub async fn insert(conn: &mut SqliteConnection, order: &Order) -> RepoResult<()> {
    let address = serde_json::to_string(&order.shipping_address)
        .map_err(|e| RepoError::Database(format!("Failed to encode shipping address: {e}")))?;

    sqlx::query(
        "INSERT INTO orders (id, order_number, user_id, status, subtotal, discount, shipping_fee, total,
                             promotion_id, shipping_address, version, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&order.id)
    .bind(&order.order_number)
    .bind(&order.user_id)
    .bind(order.status.as_db())
    .bind(order.subtotal.to_string())
    .bind(order.discount.to_string())
    .bind(order.shipping_fee.to_string())
    .bind(order.total.to_string())
    .bind(&order.promotion_id)
    .bind(address)
    .bind(order.version)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut *conn)
    .await?;

    for item in &order.items {
        sqlx::query(
            "INSERT INTO order_items (order_id, book_id, quantity, unit_price, warehouse_id)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&item.order_id)
        .bind(&item.book_id)
        .bind(item.quantity)
        .bind(item.unit_price.to_string())
        .bind(&item.warehouse_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn find_by_id(conn: &mut SqliteConnection, id: &str) -> RepoResult<Option<Order>> {
    let row = sqlx::query_as::<_, OrderRow>(
        "SELECT id, order_number, user_id, status, subtotal, discount, shipping_fee, total,
                promotion_id, shipping_address, version, created_at, updated_at
         FROM orders WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else { return Ok(None) };

    let items = sqlx::query_as::<_, OrderItemRow>(
        "SELECT order_id, book_id, quantity, unit_price, warehouse_id FROM order_items
         WHERE order_id = ? ORDER BY book_id",
    )
    .bind(id)
    .fetch_all(conn)
    .await?
    .into_iter()
    .map(OrderItemRow::into_model)
    .collect::<RepoResult<Vec<_>>>()?;

    Ok(Some(row.into_model(items)?))
}

/// Pool convenience for read paths
pub async fn get(pool: &SqlitePool, id: &str) -> RepoResult<Option<Order>> {
    let mut conn = pool.acquire().await?;
    find_by_id(&mut conn, id).await
}

/// Compare-and-swap the status. Returns false when `expected_version` is stale.
pub async fn update_status(
    conn: &mut SqliteConnection,
    id: &str,
    expected_version: i64,
    status: OrderStatus,
    now: i64,
) -> RepoResult<bool> {
    let rows = sqlx::query(
        "UPDATE orders SET status = ?, version = version + 1, updated_at = ?
         WHERE id = ? AND version = ?",
    )
    .bind(status.as_db())
    .bind(now)
    .bind(id)
    .bind(expected_version)
    .execute(conn)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

pub async fn record_history(conn: &mut SqliteConnection, change: &OrderStatusChange) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO order_status_history (order_id, from_status, to_status, actor, reason, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&change.order_id)
    .bind(change.from_status.map(|s| s.as_db()))
    .bind(change.to_status.as_db())
    .bind(&change.actor)
    .bind(&change.reason)
    .bind(change.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn history(pool: &SqlitePool, order_id: &str) -> RepoResult<Vec<OrderStatusChange>> {
    let rows = sqlx::query_as::<_, HistoryRow>(
        "SELECT order_id, from_status, to_status, actor, reason, created_at
         FROM order_status_history WHERE order_id = ? ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            let to_status = OrderStatus::from_db(&r.to_status)
                .ok_or_else(|| bad_enum("order_status_history.to_status", &r.to_status))?;
            let from_status = match r.from_status.as_deref() {
                Some(s) => Some(
                    OrderStatus::from_db(s)
                        .ok_or_else(|| bad_enum("order_status_history.from_status", s))?,
                ),
                None => None,
            };
            Ok(OrderStatusChange {
                order_id: r.order_id,
                from_status,
                to_status,
                actor: r.actor,
                reason: r.reason,
                created_at: r.created_at,
            })
        })
        .collect()
}
