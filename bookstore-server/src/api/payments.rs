//! Payment API

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use shared::models::{CreatePaymentRequest, Payment, PaymentIntent, Refund, RefundRequest};
use shared::{ApiResponse, AppResult};

use crate::auth::CurrentUser;
use crate::context::RequestContext;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().nest("/api/v1/payments", routes())
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/create", post(create))
        .route("/{id}", get(get_by_id))
        .route("/{id}/refunds", post(request_refund))
}

/// Open (or return the open) payment for a pending order
pub async fn create(
    State(state): State<AppState>,
    ctx: RequestContext,
    user: CurrentUser,
    Json(payload): Json<CreatePaymentRequest>,
) -> AppResult<Json<ApiResponse<PaymentIntent>>> {
    let ctx = ctx.with_user(&user.id);
    let intent = state
        .payments
        .create_payment(&ctx, &user.id, &payload.order_id, payload.method)
        .await?;
    Ok(Json(ApiResponse::success(intent)))
}

pub async fn get_by_id(
    State(state): State<AppState>,
    ctx: RequestContext,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Payment>>> {
    let payment = ctx
        .run(state.config.timeouts.db, state.payments.get_payment(&user.id, &id))
        .await??;
    Ok(Json(ApiResponse::success(payment)))
}

pub async fn request_refund(
    State(state): State<AppState>,
    ctx: RequestContext,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<RefundRequest>,
) -> AppResult<Json<ApiResponse<Refund>>> {
    let ctx = ctx.with_user(&user.id);
    let refund = state.payments.request_refund(&ctx, &user.id, &id, &payload).await?;
    Ok(Json(ApiResponse::success(refund)))
}
