use super::HandlerDeps;
use crate::context::RequestContext;
use crate::db::repository::{books, checkout_events, orders, users};
use crate::jobs::{Job, OrderPayload, task_types};
use crate::notify::templates;
use crate::worker::{HandlerResult, TaskHandler};
use async_trait::async_trait;
use serde_json::{Value, json};
use shared::util::now_millis;

/// `order:send_confirmation`
pub struct SendOrderConfirmation(pub HandlerDeps);

#[async_trait]
impl TaskHandler for SendOrderConfirmation {
    fn task_type(&self) -> &'static str {
        task_types::SEND_ORDER_CONFIRMATION
    }

    async fn handle(&self, job: &Job, _ctx: &RequestContext) -> HandlerResult {
        let deps = &self.0;
        let payload: OrderPayload = job.decode()?;
        let Some(order) = orders::get(&deps.pool, &payload.order_id).await? else {
            tracing::warn!(order_id = %payload.order_id, "Order not found, skipping confirmation");
            return Ok(());
        };
        let Some(user) = users::find_by_id(&deps.pool, &order.user_id).await? else {
            tracing::warn!(order_id = %order.id, user_id = %order.user_id, "Customer not found, skipping confirmation");
            return Ok(());
        };

        let mut items = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let title = books::find_by_id(&deps.pool, &item.book_id)
                .await?
                .map(|b| b.title)
                .unwrap_or_else(|| item.book_id.clone());
            items.push(json!({
                "title": title,
                "quantity": item.quantity,
                "unit_price": item.unit_price.to_string(),
            }));
        }
        let data = json!({
            "order_number": order.order_number,
            "name": user.name,
            "total": order.total.to_string(),
            "items": Value::Array(items),
        });

        let email = templates::render(templates::ORDER_CONFIRMATION, &data)?;
        let message_id = deps.send_email(&user.email, &email).await?;
        tracing::info!(order_id = %order.id, message_id, "Order confirmation sent");
        Ok(())
    }
}

/// `order:track_checkout`
pub struct TrackCheckout(pub HandlerDeps);

#[async_trait]
impl TaskHandler for TrackCheckout {
    fn task_type(&self) -> &'static str {
        task_types::TRACK_CHECKOUT
    }

    async fn handle(&self, job: &Job, _ctx: &RequestContext) -> HandlerResult {
        let deps = &self.0;
        let payload: OrderPayload = job.decode()?;
        let Some(order) = orders::get(&deps.pool, &payload.order_id).await? else {
            tracing::warn!(order_id = %payload.order_id, "Order not found, skipping checkout event");
            return Ok(());
        };

        let item_count: i64 = order.items.iter().map(|i| i.quantity).sum();
        let recorded =
            checkout_events::record_once(&deps.pool, &order.id, &order.user_id, item_count, order.total, now_millis())
                .await?;
        if !recorded {
            tracing::debug!(order_id = %order.id, "Checkout already tracked");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::test_support::*;
    use rust_decimal::Decimal;
    use shared::models::{Order, OrderItem, OrderStatus};
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    async fn order_with_lines(pool: &sqlx::SqlitePool) {
        seed_book(pool, "b1", "75000").await;
        seed_book(pool, "b2", "120000").await;
        seed_warehouse(pool, "w1", None).await;
        seed_user(pool, "u1").await;
        let line = |book: &str, quantity, price| OrderItem {
            order_id: "o1".into(),
            book_id: book.into(),
            quantity,
            unit_price: dec(price),
            warehouse_id: "w1".into(),
        };
        let order = Order {
            id: "o1".into(),
            order_number: "BK-0001".into(),
            user_id: "u1".into(),
            status: OrderStatus::Paid,
            subtotal: dec("270000"),
            discount: Decimal::ZERO,
            shipping_fee: Decimal::ZERO,
            total: dec("270000"),
            promotion_id: None,
            shipping_address: address(None),
            items: vec![line("b1", 2, "75000"), line("b2", 1, "120000")],
            version: 1,
            created_at: 0,
            updated_at: 0,
        };
        let mut conn = pool.acquire().await.unwrap();
        orders::insert(&mut conn, &order).await.unwrap();
    }

    #[tokio::test]
    async fn confirmation_is_mailed_to_the_customer() {
        let db = memory_db().await;
        order_with_lines(&db.pool).await;
        let sender = Arc::new(RecordingSender::default());

        let job = job(task_types::SEND_ORDER_CONFIRMATION, json!({"order_id": "o1"}));
        SendOrderConfirmation(deps(&db, sender.clone()))
            .handle(&job, &ctx())
            .await
            .unwrap();

        assert_eq!(sender.sent_to(), vec!["u1@example.test"]);
        assert_eq!(sender.subjects(), vec!["Order BK-0001 confirmed"]);
    }

    #[tokio::test]
    async fn confirmation_outage_is_retryable_and_missing_order_is_skipped() {
        let db = memory_db().await;
        order_with_lines(&db.pool).await;
        let sender = Arc::new(RecordingSender::default());
        sender.down.store(true, Ordering::SeqCst);
        let handler = SendOrderConfirmation(deps(&db, sender.clone()));

        let err = handler
            .handle(&job(task_types::SEND_ORDER_CONFIRMATION, json!({"order_id": "o1"})), &ctx())
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        handler
            .handle(&job(task_types::SEND_ORDER_CONFIRMATION, json!({"order_id": "gone"})), &ctx())
            .await
            .unwrap();
        assert!(sender.sent_to().is_empty());
    }

    #[tokio::test]
    async fn checkout_is_tracked_once() {
        let db = memory_db().await;
        order_with_lines(&db.pool).await;
        let handler = TrackCheckout(deps(&db, Arc::default()));
        let job = job(task_types::TRACK_CHECKOUT, json!({"order_id": "o1"}));

        handler.handle(&job, &ctx()).await.unwrap();
        handler.handle(&job, &ctx()).await.unwrap();

        assert_eq!(checkout_events::count_for_order(&db.pool, "o1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_permanent() {
        let db = memory_db().await;
        let err = TrackCheckout(deps(&db, Arc::default()))
            .handle(&job(task_types::TRACK_CHECKOUT, json!({"order": 1})), &ctx())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
