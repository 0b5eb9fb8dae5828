//! Checkout
//!
//! 1. validate the cart against the live catalogue (read only)
//! 2. re-check the applied promotion, dropping it with a warning if stale
//! 3. pick the nearest warehouse with stock for every line
//! 4. one `BEGIN IMMEDIATE` transaction: order, lines, reservations,
//!    promotion redemption, cart conversion
//! 5. enqueue side effects after commit
//! 6. open the payment

use super::pricing::{self, Quote};
use super::{OrderError, OrderResult};
use crate::config::Config;
use crate::context::RequestContext;
use crate::db::repository::{books, carts, orders, promotions};
use crate::db::{begin_immediate, with_retry};
use crate::inventory::ops;
use crate::jobs::{self, JobStore, NewTask};
use crate::payments::PaymentCoordinator;
use rust_decimal::Decimal;
use shared::error::ErrorCode;
use shared::models::{
    Book, CheckoutRequest, CheckoutResponse, CheckoutWarning, Order, OrderItem, OrderStatus,
    OrderStatusChange, Promotion, PromotionRejection, ShippingAddress, UnavailableLine,
};
use shared::util::{new_id, now_millis};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub reservation_ttl: Duration,
    pub shipping_flat_fee: Decimal,
    pub price_tolerance: Decimal,
    pub db_timeout: Duration,
}

impl CheckoutSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reservation_ttl: config.reservation_ttl,
            shipping_flat_fee: config.shipping_flat_fee,
            price_tolerance: config.price_tolerance,
            db_timeout: config.timeouts.db,
        }
    }
}

/// Order pipeline entry points
#[derive(Clone)]
pub struct OrderService {
    pub(super) pool: SqlitePool,
    pub(super) jobs: JobStore,
    pub(super) payments: PaymentCoordinator,
    pub(super) settings: CheckoutSettings,
}

/// One order line with its chosen warehouse
#[derive(Debug, Clone)]
struct PlannedLine {
    book_id: String,
    quantity: i64,
    unit_price: Decimal,
    warehouse_id: String,
}

/// Everything checked before the write transaction
#[derive(Debug)]
struct CheckoutPlan {
    cart_id: String,
    lines: Vec<PlannedLine>,
    quote: Quote,
    promotion: Option<Promotion>,
    warnings: Vec<CheckoutWarning>,
}

impl OrderService {
    pub fn new(pool: SqlitePool, jobs: JobStore, payments: PaymentCoordinator, settings: CheckoutSettings) -> Self {
        Self {
            pool,
            jobs,
            payments,
            settings,
        }
    }

    pub async fn checkout(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        req: &CheckoutRequest,
    ) -> OrderResult<CheckoutResponse> {
        let plan = ctx
            .run(self.settings.db_timeout, self.plan(user_id, &req.shipping_address))
            .await??;
        let order = ctx
            .run(self.settings.db_timeout, self.place(user_id, &req.shipping_address, &plan))
            .await??;
        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            request_id = %ctx.request_id,
            lines = order.items.len(),
            total = %order.total,
            "Order placed"
        );

        self.enqueue_side_effects(&order).await;

        let payment = self
            .payments
            .create_payment(ctx, user_id, &order.id, req.payment_method)
            .await?;
        // cash on delivery confirms the order while opening its payment
        let order = self.load(&order.id).await?;

        Ok(CheckoutResponse {
            order,
            payment,
            warnings: plan.warnings,
        })
    }

    async fn plan(&self, user_id: &str, address: &ShippingAddress) -> OrderResult<CheckoutPlan> {
        let now = now_millis();
        let mut conn = self.pool.acquire().await?;

        let cart = carts::find_active_for_user(&mut conn, user_id)
            .await?
            .ok_or(OrderError::CartNotFound)?;
        if cart.is_empty() {
            return Err(OrderError::CartEmpty);
        }
        if let Some(bad) = cart.items.iter().find(|i| i.quantity <= 0) {
            return Err(OrderError::InvalidQuantity {
                book_id: bad.book_id.clone(),
                quantity: bad.quantity,
            });
        }

        let ids: Vec<String> = cart.items.iter().map(|i| i.book_id.clone()).collect();
        let catalogue = books::find_many(&mut conn, &ids).await?;
        let by_id: HashMap<&str, &Book> = catalogue.iter().map(|b| (b.id.as_str(), b)).collect();

        let changed = pricing::price_changes(&cart.items, &by_id, self.settings.price_tolerance);
        if !changed.is_empty() {
            let fresh: Vec<(String, Decimal)> = changed
                .iter()
                .filter(|l| l.active)
                .filter_map(|l| l.current_price.map(|p| (l.book_id.clone(), p)))
                .collect();
            carts::refresh_snapshots(&mut conn, &cart.id, &fresh).await?;
            tracing::info!(cart_id = %cart.id, lines = changed.len(), "Checkout rejected, prices changed");
            return Err(OrderError::PriceChanged(changed));
        }

        let subtotal = pricing::subtotal(&cart.items, &by_id);
        let mut warnings = Vec::new();
        let promotion = match &cart.applied_promotion_id {
            None => None,
            Some(promotion_id) => {
                let promo = promotions::find_by_id(&mut conn, promotion_id).await?;
                let verdict = match &promo {
                    None => Err("promotion no longer exists".to_string()),
                    Some(p) => {
                        let usage = promotions::user_usage_count(&mut conn, &p.id, user_id).await?;
                        p.check(now, subtotal, usage).map_err(|r| r.message())
                    }
                };
                match verdict {
                    Ok(()) => promo,
                    Err(message) => {
                        carts::set_promotion(&mut conn, &cart.id, None, now).await?;
                        tracing::info!(cart_id = %cart.id, promotion_id = %promotion_id, reason = %message, "Promotion removed from cart");
                        warnings.push(CheckoutWarning {
                            code: ErrorCode::PromotionInvalidated,
                            message,
                        });
                        None
                    }
                }
            }
        };
        let quote = pricing::quote(subtotal, promotion.as_ref(), self.settings.shipping_flat_fee);

        let destination = address.coordinates();
        let mut lines = Vec::with_capacity(cart.items.len());
        let mut unavailable = Vec::new();
        for item in &cart.items {
            match ops::find_nearest_with_stock(&mut conn, &item.book_id, destination, item.quantity).await? {
                Some(nearest) => lines.push(PlannedLine {
                    book_id: item.book_id.clone(),
                    quantity: item.quantity,
                    unit_price: by_id
                        .get(item.book_id.as_str())
                        .map_or(item.unit_price_snapshot, |b| b.price),
                    warehouse_id: nearest.warehouse.id,
                }),
                None => unavailable.push(UnavailableLine {
                    book_id: item.book_id.clone(),
                    quantity: item.quantity,
                }),
            }
        }
        if !unavailable.is_empty() {
            return Err(OrderError::OutOfStock(unavailable));
        }

        Ok(CheckoutPlan {
            cart_id: cart.id,
            lines,
            quote,
            promotion,
            warnings,
        })
    }

    async fn place(&self, user_id: &str, address: &ShippingAddress, plan: &CheckoutPlan) -> OrderResult<Order> {
        let pool = &self.pool;
        let ttl_ms = self.settings.reservation_ttl.as_millis() as i64;

        with_retry("orders.checkout", move || async move {
            let now = now_millis();
            let mut tx = begin_immediate(pool).await?;

            let order_id = new_id();
            let order = Order {
                order_number: orders::next_order_number(&mut tx, now).await?,
                user_id: user_id.to_string(),
                status: OrderStatus::Pending,
                subtotal: plan.quote.subtotal,
                discount: plan.quote.discount,
                shipping_fee: plan.quote.shipping_fee,
                total: plan.quote.total,
                promotion_id: plan.promotion.as_ref().map(|p| p.id.clone()),
                shipping_address: address.clone(),
                items: plan
                    .lines
                    .iter()
                    .map(|l| OrderItem {
                        order_id: order_id.clone(),
                        book_id: l.book_id.clone(),
                        quantity: l.quantity,
                        unit_price: l.unit_price,
                        warehouse_id: l.warehouse_id.clone(),
                    })
                    .collect(),
                version: 1,
                created_at: now,
                updated_at: now,
                id: order_id,
            };
            orders::insert(&mut tx, &order).await?;

            for line in &plan.lines {
                ops::reserve(
                    &mut tx,
                    &order.id,
                    &line.warehouse_id,
                    &line.book_id,
                    line.quantity,
                    now + ttl_ms,
                    now,
                )
                .await?;
            }

            if let Some(p) = &plan.promotion {
                // re-checked under the write lock
                if let Some(limit) = p.per_user_limit
                    && promotions::user_usage_count(&mut tx, &p.id, user_id).await? >= limit
                {
                    return Err(OrderError::PromotionRejected(
                        p.code.clone(),
                        PromotionRejection::PerUserLimitReached.message(),
                    ));
                }
                if !promotions::consume(&mut tx, &p.id, user_id, &order.id, now).await? {
                    return Err(OrderError::PromotionRejected(
                        p.code.clone(),
                        PromotionRejection::UsageLimitReached.message(),
                    ));
                }
            }

            if !carts::mark_converted(&mut tx, &plan.cart_id, now).await? {
                return Err(OrderError::CartChanged);
            }

            orders::record_history(
                &mut tx,
                &OrderStatusChange {
                    order_id: order.id.clone(),
                    from_status: None,
                    to_status: OrderStatus::Pending,
                    actor: user_id.to_string(),
                    reason: Some("checkout".into()),
                    created_at: now,
                },
            )
            .await?;

            tx.commit().await?;
            Ok(order)
        })
        .await
    }

    /// Confirmation, auto-release timer, analytics and stock cache refresh.
    /// A failed enqueue is logged; the reservation sweep still frees stock
    /// if the auto-release timer is lost.
    async fn enqueue_side_effects(&self, order: &Order) {
        let release_at = order.created_at + self.settings.reservation_ttl.as_millis() as i64;
        let mut tasks = vec![
            jobs::send_order_confirmation(&order.id),
            jobs::auto_release_reservation(&order.id, release_at),
            jobs::track_checkout(&order.id),
        ];
        tasks.extend(order.items.iter().map(|i| jobs::sync_book_stock(&i.book_id)));

        for task in tasks {
            if let Err(e) = self.enqueue(task).await {
                tracing::error!(order_id = %order.id, error = %e, "Failed to enqueue checkout side effect");
            }
        }
    }

    async fn enqueue(&self, task: jobs::JobResult<NewTask>) -> jobs::JobResult<()> {
        self.jobs.enqueue(&task?).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobStatus, task_types};
    use crate::test_support::*;
    use shared::models::{DiscountRule, PaymentMethod, PaymentStatus};

    fn service(pool: &SqlitePool) -> OrderService {
        let config = Config::for_tests();
        let jobs = JobStore::new(pool.clone());
        let payments = PaymentCoordinator::new(pool.clone(), jobs.clone(), &config);
        OrderService::new(pool.clone(), jobs, payments, CheckoutSettings::from_config(&config))
    }

    fn ctx() -> RequestContext {
        RequestContext::new("test", Duration::from_secs(30))
    }

    fn request(method: PaymentMethod) -> CheckoutRequest {
        CheckoutRequest {
            shipping_address: address(Some((21.03, 105.85))),
            payment_method: method,
        }
    }

    async fn stocked(pool: &SqlitePool) {
        seed_user(pool, "u1").await;
        seed_book(pool, "b1", "10.00").await;
        seed_book(pool, "b2", "5.50").await;
        seed_warehouse(pool, "hn", Some((21.0, 105.8))).await;
        seed_warehouse(pool, "hcm", Some((10.8, 106.7))).await;
        for w in ["hn", "hcm"] {
            seed_stock(pool, w, "b1", 10).await;
            seed_stock(pool, w, "b2", 10).await;
        }
    }

    #[tokio::test]
    async fn checkout_reserves_from_the_nearest_warehouse() {
        let db = memory_db().await;
        stocked(&db.pool).await;
        let svc = service(&db.pool);
        svc.add_item("u1", "b1", 2).await.unwrap();
        svc.add_item("u1", "b2", 1).await.unwrap();

        let res = svc.checkout(&ctx(), "u1", &request(PaymentMethod::Vnpay)).await.unwrap();
        let order = &res.order;
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.subtotal, dec("25.50"));
        assert_eq!(order.total, dec("25.50"));
        assert!(order.order_number.starts_with("BK"));
        assert!(order.items.iter().all(|i| i.warehouse_id == "hn"));
        assert_eq!(level(&db.pool, "hn", "b1").await, (10, 2));
        assert_eq!(level(&db.pool, "hcm", "b1").await, (10, 0));

        assert_eq!(res.payment.status, PaymentStatus::Pending);
        assert!(res.payment.redirect_url.is_some());
        assert!(res.warnings.is_empty());

        // cart converted, a fresh one is empty
        assert!(svc.get_cart("u1").await.unwrap().items.is_empty());

        let jobs = JobStore::new(db.pool.clone());
        let release = jobs
            .list(task_types::AUTO_RELEASE_RESERVATION, JobStatus::Pending)
            .await
            .unwrap();
        assert_eq!(release.len(), 1);
        assert_eq!(release[0].dedup_key.as_deref(), Some(order.id.as_str()));
        assert!(release[0].not_before >= order.created_at + 15 * 60 * 1000);
        assert_eq!(
            jobs.list(task_types::SEND_ORDER_CONFIRMATION, JobStatus::Pending)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn empty_cart_is_rejected() {
        let db = memory_db().await;
        stocked(&db.pool).await;
        let svc = service(&db.pool);
        svc.get_cart("u1").await.unwrap();
        let err = svc.checkout(&ctx(), "u1", &request(PaymentMethod::Cod)).await.unwrap_err();
        assert!(matches!(err, OrderError::CartEmpty));
    }

    #[tokio::test]
    async fn price_change_refreshes_snapshot_and_retry_succeeds() {
        let db = memory_db().await;
        stocked(&db.pool).await;
        let svc = service(&db.pool);
        svc.add_item("u1", "b1", 1).await.unwrap();
        seed_book(&db.pool, "b1", "12.00").await;

        let err = svc.checkout(&ctx(), "u1", &request(PaymentMethod::Cod)).await.unwrap_err();
        let OrderError::PriceChanged(lines) = err else {
            panic!("expected price_changed, got {err:?}");
        };
        assert_eq!(lines[0].snapshot_price, dec("10.00"));
        assert_eq!(lines[0].current_price, Some(dec("12.00")));
        assert_eq!(level(&db.pool, "hn", "b1").await, (10, 0));

        let res = svc.checkout(&ctx(), "u1", &request(PaymentMethod::Cod)).await.unwrap();
        assert_eq!(res.order.total, dec("12.00"));
    }

    #[tokio::test]
    async fn unservable_lines_fail_without_reserving() {
        let db = memory_db().await;
        stocked(&db.pool).await;
        let svc = service(&db.pool);
        svc.add_item("u1", "b1", 1).await.unwrap();
        svc.add_item("u1", "b2", 11).await.unwrap();

        let err = svc.checkout(&ctx(), "u1", &request(PaymentMethod::Cod)).await.unwrap_err();
        let OrderError::OutOfStock(lines) = err else {
            panic!("expected out_of_stock, got {err:?}");
        };
        assert_eq!(lines, vec![UnavailableLine { book_id: "b2".into(), quantity: 11 }]);
        assert_eq!(level(&db.pool, "hn", "b1").await, (10, 0));
        assert_eq!(level(&db.pool, "hn", "b2").await, (10, 0));
    }

    #[tokio::test]
    async fn ineligible_promotion_is_dropped_with_a_warning() {
        let db = memory_db().await;
        stocked(&db.pool).await;
        let now = now_millis();
        let promo = Promotion {
            id: "p1".into(),
            code: "SPRING".into(),
            rule: DiscountRule::Percentage(dec("10")),
            starts_at: now - 10_000,
            ends_at: now + 60_000,
            usage_limit: None,
            usage_count: 0,
            per_user_limit: None,
            min_order_amount: Some(dec("100")),
            max_discount: None,
            active: true,
        };
        promotions::insert(&db.pool, &promo).await.unwrap();
        let svc = service(&db.pool);
        svc.add_item("u1", "b1", 1).await.unwrap();
        svc.apply_promotion("u1", Some("SPRING")).await.unwrap();

        // below the minimum order amount
        let res = svc.checkout(&ctx(), "u1", &request(PaymentMethod::Cod)).await.unwrap();
        assert_eq!(res.warnings.len(), 1);
        assert_eq!(res.warnings[0].code, ErrorCode::PromotionInvalidated);
        assert_eq!(res.order.discount, Decimal::ZERO);
        assert_eq!(res.order.promotion_id, None);
    }

    #[tokio::test]
    async fn valid_promotion_is_redeemed_once() {
        let db = memory_db().await;
        stocked(&db.pool).await;
        let now = now_millis();
        promotions::insert(
            &db.pool,
            &Promotion {
                id: "p1".into(),
                code: "TENOFF".into(),
                rule: DiscountRule::Fixed(dec("3")),
                starts_at: now - 10_000,
                ends_at: now + 60_000,
                usage_limit: Some(1),
                usage_count: 0,
                per_user_limit: None,
                min_order_amount: None,
                max_discount: None,
                active: true,
            },
        )
        .await
        .unwrap();
        let svc = service(&db.pool);
        svc.add_item("u1", "b1", 1).await.unwrap();
        svc.apply_promotion("u1", Some("TENOFF")).await.unwrap();

        let res = svc.checkout(&ctx(), "u1", &request(PaymentMethod::Cod)).await.unwrap();
        assert_eq!(res.order.discount, dec("3"));
        assert_eq!(res.order.total, dec("7.00"));
        // cash on delivery confirms straight away
        assert_eq!(res.order.status, OrderStatus::Confirmed);

        let mut conn = db.pool.acquire().await.unwrap();
        let p = promotions::find_by_id(&mut conn, "p1").await.unwrap().unwrap();
        assert_eq!(p.usage_count, 1);
        drop(conn);

        // cap reached, the code can no longer be applied
        let err = svc.apply_promotion("u1", Some("TENOFF")).await.unwrap_err();
        assert!(matches!(err, OrderError::PromotionRejected(..)));
    }

    #[tokio::test]
    async fn cancel_releases_stock_and_drops_the_timer() {
        let db = memory_db().await;
        stocked(&db.pool).await;
        let svc = service(&db.pool);
        svc.add_item("u1", "b1", 3).await.unwrap();
        let res = svc.checkout(&ctx(), "u1", &request(PaymentMethod::Vnpay)).await.unwrap();
        assert_eq!(level(&db.pool, "hn", "b1").await, (10, 3));

        let order = svc.cancel(&ctx(), "u1", &res.order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(level(&db.pool, "hn", "b1").await, (10, 0));

        let timer = JobStore::new(db.pool.clone())
            .find_by_key(&res.order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(timer.status, JobStatus::Cancelled);

        // a second cancel is refused, stock unchanged
        let err = svc.cancel(&ctx(), "u1", &res.order.id).await.unwrap_err();
        assert!(matches!(err, OrderError::NotCancellable(OrderStatus::Cancelled)));
        assert_eq!(level(&db.pool, "hn", "b1").await, (10, 0));
    }

    #[tokio::test]
    async fn cancel_of_someone_elses_order_is_not_found() {
        let db = memory_db().await;
        seed_order(&db.pool, "o1", OrderStatus::Pending).await;
        let svc = service(&db.pool);
        let err = svc.cancel(&ctx(), "intruder", "o1").await.unwrap_err();
        assert!(matches!(err, OrderError::NotFound(_)));
    }

    #[tokio::test]
    async fn admin_ships_and_delivers_cash_on_delivery() {
        let db = memory_db().await;
        stocked(&db.pool).await;
        let svc = service(&db.pool);
        svc.add_item("u1", "b1", 2).await.unwrap();
        let res = svc.checkout(&ctx(), "u1", &request(PaymentMethod::Cod)).await.unwrap();
        assert_eq!(res.order.status, OrderStatus::Confirmed);

        let ship = shared::models::OrderStatusUpdate {
            status: OrderStatus::Shipped,
            version: Some(res.order.version),
            reason: None,
        };
        let shipped = svc.advance_status(&ctx(), "admin", &res.order.id, &ship).await.unwrap();
        assert_eq!(shipped.status, OrderStatus::Shipped);
        assert_eq!(level(&db.pool, "hn", "b1").await, (8, 0));

        let deliver = shared::models::OrderStatusUpdate {
            status: OrderStatus::Delivered,
            version: None,
            reason: Some("signed by recipient".into()),
        };
        svc.advance_status(&ctx(), "admin", &res.order.id, &deliver).await.unwrap();

        let mut conn = db.pool.acquire().await.unwrap();
        let payments = crate::db::repository::payments::find_for_order(&mut conn, &res.order.id)
            .await
            .unwrap();
        assert_eq!(payments[0].status, PaymentStatus::Succeeded);
        drop(conn);

        let trail = crate::db::repository::audit::for_resource(&db.pool, &format!("order:{}", res.order.id))
            .await
            .unwrap();
        let actions: Vec<_> = trail.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["order.shipped", "order.delivered"]);
    }

    #[tokio::test]
    async fn admin_advance_with_stale_version_conflicts() {
        let db = memory_db().await;
        seed_order(&db.pool, "o1", OrderStatus::Pending).await;
        let svc = service(&db.pool);
        let update = shared::models::OrderStatusUpdate {
            status: OrderStatus::Confirmed,
            version: Some(7),
            reason: None,
        };
        let err = svc.advance_status(&ctx(), "admin", "o1", &update).await.unwrap_err();
        assert!(matches!(err, OrderError::VersionConflict));
    }
}
