//! Payment creation and gateway callbacks

use super::gateway::{Ack, CallbackOutcome, GatewayAdapter, Gateways, ParsedCallback};
use super::refund_client::{HttpRefundGateway, LocalRefundGateway, RefundGateway};
use super::signer::Params;
use super::{PaymentError, PaymentResult, refunds};
use crate::config::Config;
use crate::context::RequestContext;
use crate::db::repository::payments::{CallbackRecord, CallbackStatus};
use crate::db::repository::{inventory as stock_repo, orders, payments};
use crate::db::{begin_immediate, with_retry};
use crate::inventory::ops;
use crate::invariants;
use crate::jobs::{self, JobStore, auto_release_key};
use crate::orders::lifecycle;
use crate::security_log;
use serde_json::Value;
use shared::models::{Order, OrderStatus, Payment, PaymentIntent, PaymentMethod, PaymentStatus};
use shared::util::{new_id, now_millis};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct PaymentSettings {
    pub db_timeout: Duration,
    pub gateway_timeout: Duration,
}

impl PaymentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            db_timeout: config.timeouts.db,
            gateway_timeout: config.timeouts.gateway,
        }
    }
}

/// Response to hand back to the gateway
#[derive(Debug, Clone)]
pub struct CallbackReply {
    /// `false` → HTTP 400 (signature check failed)
    pub accepted: bool,
    pub body: Value,
}

#[derive(Clone)]
pub struct PaymentCoordinator {
    pub(super) pool: SqlitePool,
    pub(super) jobs: JobStore,
    gateways: Arc<Gateways>,
    pub(super) refund_gateway: Arc<dyn RefundGateway>,
    pub(super) settings: PaymentSettings,
}

/// What one verified callback changed
struct Settlement {
    ack: Ack,
    status: CallbackStatus,
    outcome: Option<String>,
    /// Books whose stock changed, for the cache refresh
    resync: Vec<String>,
}

impl Settlement {
    fn unprocessed(ack: Ack, status: CallbackStatus) -> Self {
        Self {
            ack,
            status,
            outcome: None,
            resync: Vec::new(),
        }
    }
}

impl PaymentCoordinator {
    pub fn new(pool: SqlitePool, jobs: JobStore, config: &Config) -> Self {
        let settings = PaymentSettings::from_config(config);
        let refund_gateway: Arc<dyn RefundGateway> = match &config.refund_api_url {
            Some(url) => Arc::new(HttpRefundGateway::new(url.clone(), settings.gateway_timeout)),
            None => Arc::new(LocalRefundGateway),
        };
        Self {
            pool,
            jobs,
            gateways: Arc::new(Gateways::new(config.vnpay.clone(), config.momo.clone())),
            refund_gateway,
            settings,
        }
    }

    /// Swap the refund collaborator
    pub fn with_refund_gateway(mut self, gateway: Arc<dyn RefundGateway>) -> Self {
        self.refund_gateway = gateway;
        self
    }

    pub fn gateways(&self) -> &Gateways {
        &self.gateways
    }

    /// Open a payment for a pending order, or return the open one for the
    /// same method. Cash on delivery confirms the order instead of handing
    /// out a redirect.
    pub async fn create_payment(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        order_id: &str,
        method: PaymentMethod,
    ) -> PaymentResult<PaymentIntent> {
        let pool = &self.pool;
        let gateway = self.gateways.get(method);
        let client_ip = ctx.client_ip.as_deref();

        let (payment, created) = ctx
            .run(
                self.settings.db_timeout,
                with_retry("payments.create", move || async move {
                    let now = now_millis();
                    let mut tx = begin_immediate(pool).await?;
                    let order = orders::find_by_id(&mut tx, order_id)
                        .await?
                        .filter(|o| o.user_id == user_id)
                        .ok_or_else(|| PaymentError::OrderNotFound(order_id.to_string()))?;

                    if let Some(open) = payments::find_open(&mut tx, order_id, method).await? {
                        return Ok((open, false));
                    }
                    if order.status != OrderStatus::Pending {
                        return Err(PaymentError::NotPayable(order.status));
                    }
                    if !holds_stock(&mut tx, &order).await? {
                        return Err(PaymentError::StockReleased(order.id.clone()));
                    }

                    let mut payment = Payment {
                        id: new_id(),
                        order_id: order.id.clone(),
                        method,
                        amount: order.total,
                        status: if method.is_online() {
                            PaymentStatus::Pending
                        } else {
                            PaymentStatus::Initiated
                        },
                        gateway_txn_ref: new_id().replace('-', ""),
                        idempotency_key: new_id(),
                        redirect_url: None,
                        gateway_transaction_no: None,
                        created_at: now,
                        updated_at: now,
                    };
                    if let Some(g) = gateway {
                        payment.redirect_url = Some(g.payment_url(&payment, &order, client_ip, now));
                    }
                    payments::insert(&mut tx, &payment).await?;

                    if method == PaymentMethod::Cod {
                        // stock stays reserved until the order ships
                        lifecycle::transition(
                            &mut tx,
                            &order,
                            OrderStatus::Confirmed,
                            user_id,
                            Some("cash on delivery"),
                            now,
                        )
                        .await?;
                        JobStore::cancel_by_key(&mut tx, &auto_release_key(order_id), now).await?;
                    }

                    tx.commit().await?;
                    Ok((payment, true))
                }),
            )
            .await??;

        if created {
            tracing::info!(
                payment_id = %payment.id,
                order_id = %payment.order_id,
                method = %payment.method,
                amount = %payment.amount,
                request_id = %ctx.request_id,
                "Payment created"
            );
        }
        Ok(PaymentIntent::from(&payment))
    }

    /// Verify, de-duplicate and apply a gateway callback.
    ///
    /// Everything after the signature check runs in one transaction; a
    /// callback already processed for `(gateway, txn_ref)` gets the stored
    /// response back and changes nothing.
    pub async fn handle_callback(
        &self,
        ctx: &RequestContext,
        method: PaymentMethod,
        params: &Params,
    ) -> PaymentResult<CallbackReply> {
        let gateway = self.gateways.get(method).ok_or(PaymentError::Unsupported(method))?;
        let name = method.as_db();
        let raw = serde_json::to_string(params).unwrap_or_default();

        if !gateway.verify(params) {
            let txn_ref = gateway.txn_ref(params).unwrap_or_default();
            security_log!(WARN, "invalid_signature", gateway = name, txn_ref = %txn_ref, request_id = %ctx.request_id);
            let body = gateway.ack(Ack::InvalidSignature);
            let mut conn = self.pool.acquire().await?;
            payments::record_callback(
                &mut conn,
                &CallbackRecord {
                    gateway: name,
                    txn_ref,
                    status: CallbackStatus::InvalidSignature,
                    outcome: None,
                    response_body: &body.to_string(),
                    raw_params: &raw,
                },
                now_millis(),
            )
            .await?;
            return Ok(CallbackReply { accepted: false, body });
        }

        let parsed = gateway.parse(params)?;
        let pool = &self.pool;
        let cb = &parsed;
        let raw = raw.as_str();

        let (body, resync) = ctx
            .run(
                self.settings.db_timeout,
                with_retry("payments.callback", move || async move {
                    let now = now_millis();
                    let mut tx = begin_immediate(pool).await?;

                    if let Some(stored) = payments::processed_response(&mut tx, name, &cb.txn_ref).await? {
                        tracing::info!(gateway = name, txn_ref = %cb.txn_ref, "Callback replay, returning stored response");
                        let body = match serde_json::from_str(&stored) {
                            Ok(v) => v,
                            Err(_) => Value::String(stored),
                        };
                        return Ok((body, Vec::new()));
                    }

                    let settled = settle(&mut tx, gateway, cb, now).await?;
                    let body = gateway.ack(settled.ack);
                    payments::record_callback(
                        &mut tx,
                        &CallbackRecord {
                            gateway: name,
                            txn_ref: &cb.txn_ref,
                            status: settled.status,
                            outcome: settled.outcome.as_deref(),
                            response_body: &body.to_string(),
                            raw_params: raw,
                        },
                        now,
                    )
                    .await?;
                    tx.commit().await?;
                    Ok::<_, PaymentError>((body, settled.resync))
                }),
            )
            .await??;

        for book_id in resync {
            let queued = match jobs::sync_book_stock(&book_id) {
                Ok(task) => self.jobs.enqueue(&task).await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = queued {
                tracing::error!(book_id, error = %e, "Failed to enqueue stock sync");
            }
        }

        Ok(CallbackReply { accepted: true, body })
    }

    pub async fn get_payment(&self, user_id: &str, payment_id: &str) -> PaymentResult<Payment> {
        let payment = payments::get(&self.pool, payment_id)
            .await?
            .ok_or_else(|| PaymentError::PaymentNotFound(payment_id.to_string()))?;
        match orders::get(&self.pool, &payment.order_id).await? {
            Some(order) if order.user_id == user_id => Ok(payment),
            _ => Err(PaymentError::PaymentNotFound(payment_id.to_string())),
        }
    }
}

/// Whether an order still has the stock it reserved at checkout
async fn holds_stock(conn: &mut SqliteConnection, order: &Order) -> PaymentResult<bool> {
    Ok(order.items.is_empty() || !stock_repo::reservations_for_order(conn, &order.id).await?.is_empty())
}

async fn settle(
    conn: &mut SqliteConnection,
    gateway: &dyn GatewayAdapter,
    cb: &ParsedCallback,
    now: i64,
) -> PaymentResult<Settlement> {
    let name = gateway.method().as_db();
    let Some(payment) = payments::find_by_txn_ref(conn, &cb.txn_ref)
        .await?
        .filter(|p| p.method == gateway.method())
    else {
        tracing::warn!(gateway = name, txn_ref = %cb.txn_ref, "Callback for unknown payment");
        return Ok(Settlement::unprocessed(Ack::UnknownPayment, CallbackStatus::UnknownPayment));
    };
    let order = orders::find_by_id(conn, &payment.order_id)
        .await?
        .ok_or_else(|| PaymentError::OrderNotFound(payment.order_id.clone()))?;

    let expected = gateway.encode_amount(order.total);
    if cb.amount != expected {
        invariants::report(
            "amount_mismatch",
            &format!(
                "{name} callback for payment {} reports {} but order {} expects {}",
                payment.id, cb.amount, order.id, expected
            ),
        );
        return Ok(Settlement::unprocessed(Ack::AmountMismatch, CallbackStatus::AmountMismatch));
    }

    let outcome = Some(cb.outcome.label());
    if payment.status != PaymentStatus::Pending {
        tracing::info!(payment_id = %payment.id, status = ?payment.status, "Callback for settled payment");
        return Ok(Settlement {
            ack: Ack::AlreadyConfirmed,
            status: CallbackStatus::Processed,
            outcome,
            resync: Vec::new(),
        });
    }

    let actor = format!("gateway:{name}");
    let mut resync = Vec::new();
    match &cb.outcome {
        CallbackOutcome::Success => {
            payments::transition(
                conn,
                &payment.id,
                PaymentStatus::Pending,
                PaymentStatus::Succeeded,
                cb.transaction_no.as_deref(),
                now,
            )
            .await?;
            let payable = matches!(order.status, OrderStatus::Pending | OrderStatus::Confirmed);
            if payable && holds_stock(conn, &order).await? {
                let units = ops::complete_sale(conn, &order.id, now).await?;
                lifecycle::transition(conn, &order, OrderStatus::Paid, &actor, Some("payment succeeded"), now)
                    .await?;
                JobStore::cancel_by_key(conn, &auto_release_key(&order.id), now).await?;
                tracing::info!(order_id = %order.id, payment_id = %payment.id, units, "Payment succeeded, order paid");
                resync = order.items.iter().map(|i| i.book_id.clone()).collect();
            } else {
                // the money arrived after the order gave up its stock
                refunds::open_for_late_payment(conn, &payment, &order, now).await?;
            }
        }
        CallbackOutcome::Cancelled | CallbackOutcome::Failed { .. } => {
            payments::transition(
                conn,
                &payment.id,
                PaymentStatus::Pending,
                PaymentStatus::Failed,
                cb.transaction_no.as_deref(),
                now,
            )
            .await?;
            let mut units = 0;
            if order.status == OrderStatus::Pending {
                units = ops::release(conn, &order.id, now).await?;
                resync = order.items.iter().map(|i| i.book_id.clone()).collect();
            }
            tracing::info!(
                order_id = %order.id,
                payment_id = %payment.id,
                outcome = %cb.outcome.label(),
                units,
                "Payment failed, stock released"
            );
        }
    }

    Ok(Settlement {
        ack: Ack::Confirmed,
        status: CallbackStatus::Processed,
        outcome,
        resync,
    })
}
