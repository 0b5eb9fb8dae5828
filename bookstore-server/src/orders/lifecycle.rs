//! Order state transitions
//!
//! The helpers here run inside a caller-owned transaction so that the status
//! change, its history row and any stock movement commit together.

use super::{OrderError, OrderResult, OrderService};
use crate::audit_log;
use crate::context::RequestContext;
use crate::db::repository::{audit, orders, payments};
use crate::db::{begin_immediate, with_retry};
use crate::inventory::ops;
use crate::jobs::{JobStore, auto_release_key};
use shared::models::{
    Order, OrderStatus, OrderStatusChange, OrderStatusUpdate, Payment, PaymentMethod, PaymentStatus,
};
use shared::util::now_millis;
use sqlx::{SqliteConnection, SqlitePool};

/// Apply `order.status → to` as a CAS on the version the caller read, and
/// record the change. Returns the new version.
pub async fn transition(
    conn: &mut SqliteConnection,
    order: &Order,
    to: OrderStatus,
    actor: &str,
    reason: Option<&str>,
    now: i64,
) -> OrderResult<i64> {
    if !order.status.can_transition_to(to) {
        return Err(OrderError::InvalidTransition {
            from: order.status,
            to,
        });
    }
    if !orders::update_status(conn, &order.id, order.version, to, now).await? {
        return Err(OrderError::VersionConflict);
    }
    orders::record_history(
        conn,
        &OrderStatusChange {
            order_id: order.id.clone(),
            from_status: Some(order.status),
            to_status: to,
            actor: actor.to_string(),
            reason: reason.map(str::to_string),
            created_at: now,
        },
    )
    .await?;
    tracing::info!(order_id = %order.id, from = %order.status, to = %to, actor, "Order status changed");
    Ok(order.version + 1)
}

/// Result of an auto-release attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Stock returned and the order cancelled
    Released { units: i64 },
    /// The order moved on (paid, cancelled, ...); nothing to do
    NotPending(OrderStatus),
    /// Reservations without an order row were returned to stock
    Orphaned { units: i64 },
}

/// Release the stock of an order that was never paid and cancel it.
/// Idempotent: once the order left `pending` this is a no-op.
pub async fn release_unpaid(pool: &SqlitePool, order_id: &str, actor: &str) -> OrderResult<ReleaseOutcome> {
    with_retry("orders.release_unpaid", move || async move {
        let now = now_millis();
        let mut tx = begin_immediate(pool).await?;
        let outcome = match orders::find_by_id(&mut tx, order_id).await? {
            None => ReleaseOutcome::Orphaned {
                units: ops::release(&mut tx, order_id, now).await?,
            },
            Some(order) if order.status != OrderStatus::Pending => ReleaseOutcome::NotPending(order.status),
            Some(order) => {
                let units = ops::release(&mut tx, order_id, now).await?;
                transition(&mut tx, &order, OrderStatus::Cancelled, actor, Some("reservation expired"), now)
                    .await?;
                ReleaseOutcome::Released { units }
            }
        };
        tx.commit().await?;
        Ok(outcome)
    })
    .await
}

impl OrderService {
    /// Customer cancel: only from `pending` or `confirmed`, returns the
    /// order's stock and drops its auto-release timer.
    pub async fn cancel(&self, ctx: &RequestContext, user_id: &str, order_id: &str) -> OrderResult<Order> {
        let pool = &self.pool;
        ctx.run(
            self.settings.db_timeout,
            with_retry("orders.cancel", move || async move {
                let now = now_millis();
                let mut tx = begin_immediate(pool).await?;
                let order = orders::find_by_id(&mut tx, order_id)
                    .await?
                    .filter(|o| o.user_id == user_id)
                    .ok_or_else(|| OrderError::NotFound(order_id.to_string()))?;
                if !order.status.is_cancellable() {
                    return Err(OrderError::NotCancellable(order.status));
                }

                let units = ops::release(&mut tx, order_id, now).await?;
                transition(&mut tx, &order, OrderStatus::Cancelled, user_id, Some("cancelled by customer"), now)
                    .await?;
                JobStore::cancel_by_key(&mut tx, &auto_release_key(order_id), now).await?;
                void_cash_on_delivery(&mut tx, order_id, now).await?;
                tx.commit().await?;

                tracing::info!(order_id, units, "Order cancelled");
                Ok(())
            }),
        )
        .await??;
        self.load(order_id).await
    }

    /// Administrative advance (`confirmed`, `shipped`, `delivered`,
    /// `cancelled`). Payment-driven states go through the payment flow.
    pub async fn advance_status(
        &self,
        ctx: &RequestContext,
        admin_id: &str,
        order_id: &str,
        update: &OrderStatusUpdate,
    ) -> OrderResult<Order> {
        let pool = &self.pool;
        ctx.run(
            self.settings.db_timeout,
            with_retry("orders.advance_status", move || async move {
                let now = now_millis();
                let mut tx = begin_immediate(pool).await?;
                let order = orders::find_by_id(&mut tx, order_id)
                    .await?
                    .ok_or_else(|| OrderError::NotFound(order_id.to_string()))?;
                if update.version.is_some_and(|v| v != order.version) {
                    return Err(OrderError::VersionConflict);
                }
                if matches!(update.status, OrderStatus::Paid | OrderStatus::Refunded) {
                    return Err(OrderError::InvalidTransition {
                        from: order.status,
                        to: update.status,
                    });
                }
                // online orders are confirmed and shipped only through their payment
                let needs_cod = matches!(
                    (order.status, update.status),
                    (OrderStatus::Pending, OrderStatus::Confirmed) | (OrderStatus::Confirmed, OrderStatus::Shipped)
                );
                if needs_cod && open_cash_on_delivery(&mut tx, order_id).await?.is_none() {
                    return Err(OrderError::NotPaid(order_id.to_string()));
                }

                let reason = update.reason.as_deref();
                transition(&mut tx, &order, update.status, admin_id, reason, now).await?;
                let mut details = serde_json::json!({
                    "from": order.status.as_db(),
                    "to": update.status.as_db(),
                    "reason": reason,
                });

                match update.status {
                    OrderStatus::Shipped => {
                        // cash on delivery still holds its reservations
                        let sold = ops::complete_sale(&mut tx, order_id, now).await?;
                        details["units_sold"] = sold.into();
                    }
                    OrderStatus::Delivered => {
                        settle_cash_on_delivery(&mut tx, order_id, now).await?;
                    }
                    OrderStatus::Cancelled => {
                        let released = ops::release(&mut tx, order_id, now).await?;
                        JobStore::cancel_by_key(&mut tx, &auto_release_key(order_id), now).await?;
                        void_cash_on_delivery(&mut tx, order_id, now).await?;
                        details["units_released"] = released.into();
                    }
                    _ => {}
                }

                let action = format!("order.{}", update.status.as_db());
                let resource = format!("order:{order_id}");
                audit::record(&mut tx, admin_id, &action, &resource, Some(&details), now).await?;
                tx.commit().await?;

                audit_log!(admin_id, action, resource, details);
                Ok(())
            }),
        )
        .await??;
        self.load(order_id).await
    }

    pub async fn get_order(&self, user_id: &str, order_id: &str) -> OrderResult<Order> {
        self.load(order_id)
            .await
            .and_then(|o| if o.user_id == user_id { Ok(o) } else { Err(OrderError::NotFound(order_id.to_string())) })
    }

    pub async fn history(&self, order_id: &str) -> OrderResult<Vec<OrderStatusChange>> {
        Ok(orders::history(&self.pool, order_id).await?)
    }

    pub(super) async fn load(&self, order_id: &str) -> OrderResult<Order> {
        orders::get(&self.pool, order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))
    }
}

/// The order's cash-on-delivery payment that is still waiting to be collected
async fn open_cash_on_delivery(conn: &mut SqliteConnection, order_id: &str) -> OrderResult<Option<Payment>> {
    Ok(payments::find_for_order(conn, order_id)
        .await?
        .into_iter()
        .find(|p| p.method == PaymentMethod::Cod && p.status == PaymentStatus::Initiated))
}

/// A delivered cash-on-delivery order is paid at the door
async fn settle_cash_on_delivery(conn: &mut SqliteConnection, order_id: &str, now: i64) -> OrderResult<()> {
    if let Some(p) = open_cash_on_delivery(conn, order_id).await? {
        payments::transition(conn, &p.id, PaymentStatus::Initiated, PaymentStatus::Succeeded, None, now).await?;
        tracing::info!(order_id, payment_id = %p.id, "Cash on delivery collected");
    }
    Ok(())
}

/// A cancelled cash-on-delivery order will never be collected
async fn void_cash_on_delivery(conn: &mut SqliteConnection, order_id: &str, now: i64) -> OrderResult<()> {
    if let Some(p) = open_cash_on_delivery(conn, order_id).await? {
        payments::transition(conn, &p.id, PaymentStatus::Initiated, PaymentStatus::Failed, None, now).await?;
        tracing::info!(order_id, payment_id = %p.id, "Cash on delivery voided");
    }
    Ok(())
}
