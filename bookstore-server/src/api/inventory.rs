//! Inventory API
//!
//! Reservation primitives for internal callers (service token) plus the
//! public availability read. Every stock change drops the book's cached
//! snapshot; the next read recomputes it.

use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use shared::models::{AdjustStockRequest, Availability, OrderStockRequest, ReserveStockRequest, StockLevel};
use shared::{ApiResponse, AppError, AppResult};

use crate::context::RequestContext;
use crate::db::repository::{RepoError, inventory as repo};
use crate::keyspace::{STOCK_CACHE_TTL, book_stock_key};
use crate::state::AppState;

/// `/api/v1/inventories/*` behind the service token
pub fn service_router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/inventories/reserve", post(reserve))
        .route("/api/v1/inventories/release", post(release))
        .route("/api/v1/inventories/complete-sale", post(complete_sale))
        .route("/api/v1/inventories/adjust", post(adjust))
}

pub fn public_router() -> Router<AppState> {
    Router::new().route("/api/v1/inventories/availability", get(availability))
}

/// Longest hold a caller may ask for (one week)
const MAX_TTL_MINUTES: i64 = 7 * 24 * 60;

fn reservation_ttl(minutes: Option<i64>, default: Duration) -> AppResult<Duration> {
    match minutes {
        None => Ok(default),
        Some(m) if (1..=MAX_TTL_MINUTES).contains(&m) => Ok(Duration::from_secs(m as u64 * 60)),
        Some(m) => Err(AppError::validation(format!(
            "ttl_minutes must be between 1 and {MAX_TTL_MINUTES}"
        ))
        .with_detail("ttl_minutes", m)),
    }
}

/// Units moved by a release or sale
#[derive(Debug, Serialize)]
pub struct UnitsResponse {
    pub order_id: String,
    pub units: i64,
}

pub async fn reserve(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(payload): Json<ReserveStockRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    let ttl = reservation_ttl(payload.ttl_minutes, state.config.reservation_ttl)?;
    ctx.run(
        state.config.timeouts.db,
        state.engine.reserve(
            &payload.order_id,
            &payload.warehouse_id,
            &payload.book_id,
            payload.quantity,
            ttl,
        ),
    )
    .await??;
    state.cache.invalidate(&book_stock_key(&payload.book_id)).await;
    Ok(Json(ApiResponse::ok()))
}

pub async fn release(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(payload): Json<OrderStockRequest>,
) -> AppResult<Json<ApiResponse<UnitsResponse>>> {
    let books = held_books(&state, &ctx, &payload.order_id).await?;
    let units = ctx
        .run(state.config.timeouts.db, state.engine.release(&payload.order_id))
        .await??;
    invalidate_books(&state, &books).await;
    Ok(Json(ApiResponse::success(UnitsResponse {
        order_id: payload.order_id,
        units,
    })))
}

pub async fn complete_sale(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(payload): Json<OrderStockRequest>,
) -> AppResult<Json<ApiResponse<UnitsResponse>>> {
    let books = held_books(&state, &ctx, &payload.order_id).await?;
    let units = ctx
        .run(state.config.timeouts.db, state.engine.complete_sale(&payload.order_id))
        .await??;
    invalidate_books(&state, &books).await;
    Ok(Json(ApiResponse::success(UnitsResponse {
        order_id: payload.order_id,
        units,
    })))
}

pub async fn adjust(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(payload): Json<AdjustStockRequest>,
) -> AppResult<Json<ApiResponse<StockLevel>>> {
    let level = ctx
        .run(
            state.config.timeouts.db,
            state.engine.adjust_stock(&payload.warehouse_id, &payload.book_id, payload.delta),
        )
        .await??;
    tracing::info!(
        warehouse_id = %payload.warehouse_id,
        book_id = %payload.book_id,
        delta = payload.delta,
        quantity = level.quantity,
        "Stock adjusted"
    );
    state.cache.invalidate(&book_stock_key(&payload.book_id)).await;
    Ok(Json(ApiResponse::success(level)))
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub book_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

/// Served from the cached snapshot when present
pub async fn availability(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<AvailabilityQuery>,
) -> AppResult<Json<ApiResponse<Availability>>> {
    if query.quantity < 0 {
        return Err(AppError::validation("quantity must not be negative"));
    }
    let key = book_stock_key(&query.book_id);
    if let Some(mut cached) = state.cache.get::<Availability>(&key).await {
        cached.requested = query.quantity;
        cached.sufficient = cached.total_available >= query.quantity;
        return Ok(Json(ApiResponse::success(cached)));
    }

    let fresh = ctx
        .run(
            state.config.timeouts.db,
            state.engine.check_availability(&query.book_id, query.quantity),
        )
        .await??;
    state.cache.set(&key, &fresh, STOCK_CACHE_TTL).await;
    Ok(Json(ApiResponse::success(fresh)))
}

/// Books an order currently holds, read before the holds disappear
async fn held_books(state: &AppState, ctx: &RequestContext, order_id: &str) -> AppResult<Vec<String>> {
    let reservations = ctx
        .run(state.config.timeouts.db, async {
            let mut conn = state.db.pool.acquire().await.map_err(RepoError::from)?;
            repo::reservations_for_order(&mut conn, order_id).await
        })
        .await??;
    let mut books: Vec<String> = reservations.into_iter().map(|r| r.book_id).collect();
    books.dedup();
    Ok(books)
}

async fn invalidate_books(state: &AppState, books: &[String]) {
    for book_id in books {
        state.cache.invalidate(&book_stock_key(book_id)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::ErrorCode;

    #[test]
    fn ttl_defaults_and_bounds() {
        let default = Duration::from_secs(15 * 60);
        assert_eq!(reservation_ttl(None, default).unwrap(), default);
        assert_eq!(reservation_ttl(Some(30), default).unwrap(), Duration::from_secs(1800));
        for bad in [0, -5, MAX_TTL_MINUTES + 1, i64::MAX] {
            let err = reservation_ttl(Some(bad), default).unwrap_err();
            assert_eq!(err.code, ErrorCode::ValidationFailed);
        }
    }
}
