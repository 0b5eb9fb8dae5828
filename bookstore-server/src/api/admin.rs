//! Admin API
//!
//! Order status changes and refund decisions (admin role), plus dead-letter
//! handling for operators (service token).

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::Deserialize;
use shared::models::{Order, OrderStatusUpdate, Refund, RefundDecision};
use shared::{ApiResponse, AppError, AppResult};

use crate::audit_log;
use crate::auth::CurrentUser;
use crate::context::RequestContext;
use crate::jobs::Job;
use crate::state::AppState;

/// Admin-only routes; mount behind `require_auth` + `require_admin`
pub fn router() -> Router<AppState> {
    Router::new().nest(
        "/api/v1/admin",
        Router::new()
            .route("/orders/{id}/status", post(update_order_status))
            .route("/refunds/{id}", get(get_refund))
            .route("/refunds/{id}/approve", post(approve_refund))
            .route("/refunds/{id}/reject", post(reject_refund)),
    )
}

/// Operator routes; mount behind `require_service`
pub fn service_router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/admin/jobs/dead", get(dead_letters))
        .route("/api/v1/admin/jobs/{id}/requeue", post(requeue))
}

pub async fn update_order_status(
    State(state): State<AppState>,
    ctx: RequestContext,
    admin: CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<OrderStatusUpdate>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let ctx = ctx.with_user(&admin.id);
    let order = state.orders.advance_status(&ctx, &admin.id, &id, &payload).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn get_refund(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Refund>>> {
    let refund = ctx
        .run(state.config.timeouts.db, state.payments.get_refund(&id))
        .await??;
    Ok(Json(ApiResponse::success(refund)))
}

pub async fn approve_refund(
    State(state): State<AppState>,
    ctx: RequestContext,
    admin: CurrentUser,
    Path(id): Path<String>,
    payload: Option<Json<RefundDecision>>,
) -> AppResult<Json<ApiResponse<Refund>>> {
    let ctx = ctx.with_user(&admin.id);
    let decision = payload.map(|Json(d)| d).unwrap_or_default();
    let refund = state.payments.approve_refund(&ctx, &admin.id, &id, &decision).await?;
    Ok(Json(ApiResponse::success(refund)))
}

pub async fn reject_refund(
    State(state): State<AppState>,
    ctx: RequestContext,
    admin: CurrentUser,
    Path(id): Path<String>,
    payload: Option<Json<RefundDecision>>,
) -> AppResult<Json<ApiResponse<Refund>>> {
    let ctx = ctx.with_user(&admin.id);
    let decision = payload.map(|Json(d)| d).unwrap_or_default();
    let refund = state.payments.reject_refund(&ctx, &admin.id, &id, &decision).await?;
    Ok(Json(ApiResponse::success(refund)))
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn dead_letters(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<DeadLetterQuery>,
) -> AppResult<Json<ApiResponse<Vec<Job>>>> {
    if !(1..=500).contains(&query.limit) {
        return Err(AppError::validation("limit must be between 1 and 500"));
    }
    let jobs = ctx
        .run(state.config.timeouts.db, state.jobs.dead_letters(query.limit))
        .await??;
    Ok(Json(ApiResponse::success(jobs)))
}

/// Put a dead-lettered job back on its queue with a fresh attempt budget
pub async fn requeue(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<()>>> {
    ctx.run(state.config.timeouts.db, state.jobs.requeue(&id)).await??;
    audit_log!("service", "job.requeued", format!("job:{id}"));
    Ok(Json(ApiResponse::ok()))
}
