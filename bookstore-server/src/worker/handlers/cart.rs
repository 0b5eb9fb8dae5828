use super::{HandlerDeps, SweepLock};
use crate::context::RequestContext;
use crate::db::repository::{carts, orders, promotions};
use crate::jobs::{BatchPayload, Job, OrderPayload, task_types};
use crate::notify::templates;
use crate::orders::{ReleaseOutcome, lifecycle};
use crate::worker::{HandlerResult, TaskHandler};
use async_trait::async_trait;
use serde_json::json;
use shared::util::now_millis;
use std::time::Duration;
use tokio::time::Instant;

const SYSTEM_ACTOR: &str = "system";
const SWEEP_CURSOR_KEY: &str = "promotion_sweep:cursor";
const SWEEP_CURSOR_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Upper bound on orders the expiry safety net releases per run
const EXPIRED_BATCH: i64 = 200;
const EXPIRED_SWEEP_LOCK: &str = "sweep:release_expired_reservations";
const PROMOTION_SWEEP_LOCK: &str = "sweep:remove_expired_promotions";
/// Sweeps stop short of the lock lease so the lock never expires under them
const SWEEP_BUDGET: Duration = Duration::from_secs(25);

/// Release an unpaid order's stock at the end of its reservation window
pub async fn release_order(deps: &HandlerDeps, order_id: &str) -> HandlerResult {
    match lifecycle::release_unpaid(&deps.pool, order_id, SYSTEM_ACTOR).await? {
        ReleaseOutcome::Released { units } => {
            tracing::info!(order_id, units, "Unpaid order released");
            if let Some(order) = orders::get(&deps.pool, order_id).await? {
                let book_ids: Vec<String> = order.items.into_iter().map(|i| i.book_id).collect();
                deps.resync_books(&book_ids).await;
            }
        }
        ReleaseOutcome::NotPending(status) => {
            tracing::debug!(order_id, %status, "Order no longer pending, nothing to release");
        }
        ReleaseOutcome::Orphaned { units } => {
            tracing::warn!(order_id, units, "Released reservations without an order");
        }
    }
    Ok(())
}

/// `cart:auto_release_reservation`
pub struct AutoReleaseReservation(pub HandlerDeps);

#[async_trait]
impl TaskHandler for AutoReleaseReservation {
    fn task_type(&self) -> &'static str {
        task_types::AUTO_RELEASE_RESERVATION
    }

    async fn handle(&self, job: &Job, _ctx: &RequestContext) -> HandlerResult {
        let payload: OrderPayload = job.decode()?;
        release_order(&self.0, &payload.order_id).await
    }
}

/// `cart:release_expired_reservations`: safety net for auto-release timers
/// that were lost or cancelled
pub struct ReleaseExpiredReservations(pub HandlerDeps);

#[async_trait]
impl TaskHandler for ReleaseExpiredReservations {
    fn task_type(&self) -> &'static str {
        task_types::RELEASE_EXPIRED_RESERVATIONS
    }

    async fn handle(&self, job: &Job, ctx: &RequestContext) -> HandlerResult {
        let payload: BatchPayload = job.decode()?;
        let lock = self.0.begin_sweep(EXPIRED_SWEEP_LOCK).await;
        if lock.is_busy() {
            return Ok(());
        }
        let result = release_expired(&self.0, payload.limit.unwrap_or(EXPIRED_BATCH), ctx).await;
        self.0.end_sweep(lock).await;
        result
    }
}

async fn release_expired(deps: &HandlerDeps, limit: i64, ctx: &RequestContext) -> HandlerResult {
    let expired = deps.engine.expired_reservations(now_millis(), limit).await?;
    if expired.is_empty() {
        return Ok(());
    }

    tracing::info!(orders = expired.len(), "Releasing expired reservations");
    let started = Instant::now();
    for order_id in &expired {
        if ctx.is_expired() || started.elapsed() >= SWEEP_BUDGET {
            // the rest is picked up by the next tick
            break;
        }
        release_order(deps, order_id).await?;
    }
    Ok(())
}

/// `cart:remove_expired_promotions`
///
/// Walks active carts with a promotion in id order, `limit` carts per run,
/// and resumes after the last cart seen on the next run. The cursor wraps
/// to the start once the end is reached.
pub struct RemoveExpiredPromotions(pub HandlerDeps);

#[async_trait]
impl TaskHandler for RemoveExpiredPromotions {
    fn task_type(&self) -> &'static str {
        task_types::REMOVE_EXPIRED_PROMOTIONS
    }

    async fn handle(&self, job: &Job, _ctx: &RequestContext) -> HandlerResult {
        let payload: BatchPayload = job.decode()?;
        let lock = self.0.begin_sweep(PROMOTION_SWEEP_LOCK).await;
        if lock.is_busy() {
            return Ok(());
        }
        let limit = payload.limit.unwrap_or(self.0.promotion_sweep_limit).max(1);
        let result = sweep_promotions(&self.0, limit, &lock).await;
        self.0.end_sweep(lock).await;
        result
    }
}

async fn sweep_promotions(deps: &HandlerDeps, limit: i64, lock: &SweepLock) -> HandlerResult {
    let cursor: String = deps.cache.get(SWEEP_CURSOR_KEY).await.unwrap_or_default();
    let now = now_millis();
    let started = Instant::now();

    let batch = carts::with_promotion_after(&deps.pool, &cursor, limit).await?;
    let mut removed = 0;
    let mut last_seen: Option<&str> = None;
    let mut out_of_time = false;
    for cart in &batch {
        if started.elapsed() >= SWEEP_BUDGET {
            out_of_time = true;
            break;
        }
        last_seen = Some(cart.id.as_str());
        let promotion = {
            let mut conn = deps.pool.acquire().await.map_err(crate::db::repository::RepoError::from)?;
            promotions::find_by_id(&mut conn, &cart.applied_promotion_id).await?
        };
        let rejection = match &promotion {
            None => "promotion no longer exists".to_string(),
            Some(p) => match p.check_standing(now) {
                Ok(()) => continue,
                Err(why) => why.message(),
            },
        };

        if !carts::remove_promotion_if(&deps.pool, &cart.id, &cart.applied_promotion_id, now).await? {
            continue;
        }
        removed += 1;

        if let Some(user_id) = &cart.user_id {
            let code = promotion.as_ref().map(|p| p.code.as_str()).unwrap_or_default();
            let data = json!({"cart_id": cart.id, "code": code, "reason": rejection});
            if let Err(e) = deps.publisher.publish(user_id, templates::PROMOTION_REMOVED, &data).await {
                tracing::warn!(cart_id = %cart.id, user_id, error = %e, "Failed to queue promotion notice");
            }
        }
    }

    let next = match batch.last() {
        // resume right after the last cart looked at
        _ if out_of_time => last_seen.map_or(cursor, str::to_string),
        Some(last) if batch.len() as i64 == limit => last.id.clone(),
        _ => String::new(),
    };
    deps.cache.set(SWEEP_CURSOR_KEY, &next, SWEEP_CURSOR_TTL).await;

    tracing::info!(
        scanned = batch.len(),
        removed,
        wrapped = next.is_empty(),
        guarded = matches!(lock, SweepLock::Held(_)),
        "Promotion sweep"
    );
    Ok(())
}
