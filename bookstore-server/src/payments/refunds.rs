//! Refund state machine
//!
//! `requested → approved → succeeded | failed`, or `requested → rejected`.
//! Approval enqueues `payment:execute_refund` in the same transaction; the
//! job calls the gateway and settles the refund.

use super::refund_client::{RefundCall, RefundGatewayError};
use super::{PaymentCoordinator, PaymentError, PaymentResult};
use crate::audit_log;
use crate::context::RequestContext;
use crate::db::repository::{audit, orders, payments, refunds};
use crate::db::{begin_immediate, with_retry};
use crate::jobs::{self, JobStore};
use crate::orders::{OrderError, lifecycle};
use rust_decimal::Decimal;
use serde_json::json;
use shared::models::{
    Order, OrderStatus, Payment, PaymentStatus, Refund, RefundDecision, RefundRequest, RefundStatus,
};
use shared::util::{new_id, now_millis};
use sqlx::SqliteConnection;

const SYSTEM_ACTOR: &str = "system";

/// Result of one execution attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundExecution {
    Succeeded { gateway_ref: String },
    /// Gave up; the payment is back to `succeeded`
    Failed { reason: String },
    /// Not in `approved` (already settled or never approved)
    Skipped(RefundStatus),
}

fn resource(refund_id: &str) -> String {
    format!("refund:{refund_id}")
}

async fn load(conn: &mut SqliteConnection, refund_id: &str) -> PaymentResult<Refund> {
    refunds::find_by_id(conn, refund_id)
        .await?
        .ok_or_else(|| PaymentError::RefundNotFound(refund_id.to_string()))
}

/// Move a refund along the state machine, guarded on its current status
async fn step(
    conn: &mut SqliteConnection,
    refund: &Refund,
    to: RefundStatus,
    decided_by: Option<&str>,
    gateway_ref: Option<&str>,
    now: i64,
) -> PaymentResult<()> {
    let invalid = PaymentError::InvalidRefundTransition {
        from: refund.status,
        to,
    };
    if !refund.status.can_transition_to(to) {
        return Err(invalid);
    }
    if !refunds::transition(conn, &refund.id, refund.status, to, decided_by, gateway_ref, now).await? {
        return Err(invalid);
    }
    Ok(())
}

/// A success callback arrived for an order that can no longer be paid.
/// Keep the money on record and open a full refund for operator review.
pub(super) async fn open_for_late_payment(
    conn: &mut SqliteConnection,
    payment: &Payment,
    order: &Order,
    now: i64,
) -> PaymentResult<Refund> {
    let refund = Refund {
        id: new_id(),
        payment_id: payment.id.clone(),
        order_id: order.id.clone(),
        amount: payment.amount,
        status: RefundStatus::Requested,
        reason: Some(format!("payment settled after the order was {}", order.status)),
        requested_by: SYSTEM_ACTOR.into(),
        decided_by: None,
        gateway_ref: None,
        created_at: now,
        updated_at: now,
    };
    refunds::insert(conn, &refund).await?;
    payments::transition(
        conn,
        &payment.id,
        PaymentStatus::Succeeded,
        PaymentStatus::RefundRequested,
        None,
        now,
    )
    .await?;
    let details = json!({ "payment_id": payment.id, "amount": refund.amount.to_string(), "order_status": order.status.as_db() });
    audit::record(conn, SYSTEM_ACTOR, "refund.requested", &resource(&refund.id), Some(&details), now).await?;
    tracing::warn!(
        order_id = %order.id,
        payment_id = %payment.id,
        refund_id = %refund.id,
        order_status = %order.status,
        "Late payment, refund opened for review"
    );
    Ok(refund)
}

impl PaymentCoordinator {
    /// Customer refund request against a settled payment of a paid order.
    /// `amount` defaults to the whole payment.
    pub async fn request_refund(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        payment_id: &str,
        req: &RefundRequest,
    ) -> PaymentResult<Refund> {
        let pool = &self.pool;
        let refund = ctx
            .run(
                self.settings.db_timeout,
                with_retry("refunds.request", move || async move {
                    let now = now_millis();
                    let mut tx = begin_immediate(pool).await?;
                    let payment = payments::find_by_id(&mut tx, payment_id)
                        .await?
                        .ok_or_else(|| PaymentError::PaymentNotFound(payment_id.to_string()))?;
                    let order = orders::find_by_id(&mut tx, &payment.order_id)
                        .await?
                        .filter(|o| o.user_id == user_id)
                        .ok_or_else(|| PaymentError::PaymentNotFound(payment_id.to_string()))?;

                    match payment.status {
                        PaymentStatus::Succeeded => {}
                        PaymentStatus::RefundRequested => return Err(PaymentError::RefundInProgress(payment.id)),
                        other => return Err(PaymentError::NotRefundable(other)),
                    }
                    if order.status != OrderStatus::Paid {
                        return Err(OrderError::InvalidTransition {
                            from: order.status,
                            to: OrderStatus::Refunded,
                        }
                        .into());
                    }
                    let amount = req.amount.unwrap_or(payment.amount);
                    if amount <= Decimal::ZERO {
                        return Err(PaymentError::InvalidRefundAmount(amount));
                    }
                    if amount > payment.amount {
                        return Err(PaymentError::RefundAmountExceeded {
                            requested: amount,
                            paid: payment.amount,
                        });
                    }
                    if !refunds::find_active_for_payment(&mut tx, &payment.id).await?.is_empty() {
                        return Err(PaymentError::RefundInProgress(payment.id));
                    }

                    let refund = Refund {
                        id: new_id(),
                        payment_id: payment.id.clone(),
                        order_id: order.id.clone(),
                        amount,
                        status: RefundStatus::Requested,
                        reason: req.reason.clone(),
                        requested_by: user_id.to_string(),
                        decided_by: None,
                        gateway_ref: None,
                        created_at: now,
                        updated_at: now,
                    };
                    refunds::insert(&mut tx, &refund).await?;
                    payments::transition(
                        &mut tx,
                        &payment.id,
                        PaymentStatus::Succeeded,
                        PaymentStatus::RefundRequested,
                        None,
                        now,
                    )
                    .await?;
                    let details = json!({ "payment_id": payment.id, "amount": amount.to_string(), "reason": req.reason });
                    audit::record(&mut tx, user_id, "refund.requested", &resource(&refund.id), Some(&details), now)
                        .await?;
                    tx.commit().await?;
                    Ok(refund)
                }),
            )
            .await??;

        audit_log!(user_id, "refund.requested", resource(&refund.id));
        Ok(refund)
    }

    /// Admin approval; queues the gateway call
    pub async fn approve_refund(
        &self,
        ctx: &RequestContext,
        admin_id: &str,
        refund_id: &str,
        decision: &RefundDecision,
    ) -> PaymentResult<Refund> {
        let pool = &self.pool;
        ctx.run(
            self.settings.db_timeout,
            with_retry("refunds.approve", move || async move {
                let now = now_millis();
                let mut tx = begin_immediate(pool).await?;
                let refund = load(&mut tx, refund_id).await?;
                step(&mut tx, &refund, RefundStatus::Approved, Some(admin_id), None, now).await?;
                JobStore::enqueue_in(&mut tx, &jobs::execute_refund(refund_id)?).await?;
                let details = json!({ "amount": refund.amount.to_string(), "reason": decision.reason });
                audit::record(&mut tx, admin_id, "refund.approved", &resource(refund_id), Some(&details), now)
                    .await?;
                tx.commit().await?;
                Ok::<_, PaymentError>(())
            }),
        )
        .await??;

        audit_log!(admin_id, "refund.approved", resource(refund_id));
        self.get_refund(refund_id).await
    }

    /// Admin rejection; the payment goes back to `succeeded`
    pub async fn reject_refund(
        &self,
        ctx: &RequestContext,
        admin_id: &str,
        refund_id: &str,
        decision: &RefundDecision,
    ) -> PaymentResult<Refund> {
        let pool = &self.pool;
        ctx.run(
            self.settings.db_timeout,
            with_retry("refunds.reject", move || async move {
                let now = now_millis();
                let mut tx = begin_immediate(pool).await?;
                let refund = load(&mut tx, refund_id).await?;
                step(&mut tx, &refund, RefundStatus::Rejected, Some(admin_id), None, now).await?;
                payments::transition(
                    &mut tx,
                    &refund.payment_id,
                    PaymentStatus::RefundRequested,
                    PaymentStatus::Succeeded,
                    None,
                    now,
                )
                .await?;
                let details = json!({ "amount": refund.amount.to_string(), "reason": decision.reason });
                audit::record(&mut tx, admin_id, "refund.rejected", &resource(refund_id), Some(&details), now)
                    .await?;
                tx.commit().await?;
                Ok::<_, PaymentError>(())
            }),
        )
        .await??;

        audit_log!(admin_id, "refund.rejected", resource(refund_id));
        self.get_refund(refund_id).await
    }

    pub async fn get_refund(&self, refund_id: &str) -> PaymentResult<Refund> {
        refunds::get(&self.pool, refund_id)
            .await?
            .ok_or_else(|| PaymentError::RefundNotFound(refund_id.to_string()))
    }

    /// Execute an approved refund against the gateway.
    ///
    /// A transient gateway failure is returned as an error so the job
    /// retries; once `final_attempt` is set (or the gateway refuses
    /// outright) the refund is marked `failed` and the payment returns to
    /// `succeeded`.
    pub async fn execute_refund(&self, refund_id: &str, final_attempt: bool) -> PaymentResult<RefundExecution> {
        let (refund, payment) = {
            let mut conn = self.pool.acquire().await?;
            let refund = load(&mut conn, refund_id).await?;
            if refund.status != RefundStatus::Approved {
                tracing::info!(refund_id, status = ?refund.status, "Refund not approved, skipping");
                return Ok(RefundExecution::Skipped(refund.status));
            }
            let payment = payments::find_by_id(&mut conn, &refund.payment_id)
                .await?
                .ok_or_else(|| PaymentError::PaymentNotFound(refund.payment_id.clone()))?;
            (refund, payment)
        };

        let call = RefundCall {
            refund_id: refund.id.clone(),
            payment_id: payment.id.clone(),
            method: payment.method,
            txn_ref: payment.gateway_txn_ref.clone(),
            transaction_no: payment.gateway_transaction_no.clone(),
            amount: refund.amount,
        };
        let result = match tokio::time::timeout(self.settings.gateway_timeout, self.refund_gateway.refund(&call)).await
        {
            Ok(r) => r,
            Err(_) => Err(RefundGatewayError::Unavailable("timed out".into())),
        };

        match result {
            Ok(gateway_ref) => {
                self.settle_refund(&refund, Some(&gateway_ref)).await?;
                tracing::info!(refund_id, gateway_ref = %gateway_ref, amount = %refund.amount, "Refund succeeded");
                Ok(RefundExecution::Succeeded { gateway_ref })
            }
            Err(RefundGatewayError::Unavailable(msg)) if !final_attempt => {
                tracing::warn!(refund_id, error = %msg, "Refund gateway unavailable, will retry");
                Err(PaymentError::Gateway(msg))
            }
            Err(e) => {
                let reason = e.to_string();
                self.settle_refund(&refund, None).await?;
                tracing::error!(refund_id, error = %reason, "Refund failed");
                Ok(RefundExecution::Failed { reason })
            }
        }
    }

    /// Record the gateway outcome: `Some(ref)` settles, `None` fails
    async fn settle_refund(&self, refund: &Refund, gateway_ref: Option<&str>) -> PaymentResult<()> {
        let pool = &self.pool;
        with_retry("refunds.settle", move || async move {
            let now = now_millis();
            let mut tx = begin_immediate(pool).await?;
            let current = load(&mut tx, &refund.id).await?;
            let (to, payment_to, action) = match gateway_ref {
                Some(_) => (RefundStatus::Succeeded, PaymentStatus::Refunded, "refund.succeeded"),
                None => (RefundStatus::Failed, PaymentStatus::Succeeded, "refund.failed"),
            };
            step(&mut tx, &current, to, None, gateway_ref, now).await?;
            payments::transition(
                &mut tx,
                &refund.payment_id,
                PaymentStatus::RefundRequested,
                payment_to,
                None,
                now,
            )
            .await?;

            if gateway_ref.is_some()
                && let Some(order) = orders::find_by_id(&mut tx, &refund.order_id).await?
                && order.status == OrderStatus::Paid
            {
                lifecycle::transition(
                    &mut tx,
                    &order,
                    OrderStatus::Refunded,
                    SYSTEM_ACTOR,
                    Some("refund settled"),
                    now,
                )
                .await?;
            }

            let details = json!({ "amount": refund.amount.to_string(), "gateway_ref": gateway_ref });
            audit::record(&mut tx, SYSTEM_ACTOR, action, &resource(&refund.id), Some(&details), now).await?;
            tx.commit().await?;
            audit_log!(SYSTEM_ACTOR, action, resource(&refund.id));
            Ok(())
        })
        .await
    }
}
