//! Cart API
//!
//! The caller's active cart, promotion codes and checkout.

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use shared::models::{AddCartItemRequest, ApplyPromotionRequest, Cart, CheckoutRequest, CheckoutResponse};
use shared::{ApiResponse, AppResult};

use crate::auth::CurrentUser;
use crate::context::RequestContext;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().nest("/api/v1/cart", routes())
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/items", post(add_item))
        .route("/promotion", post(apply_promotion))
        .route("/checkout", post(checkout))
}

pub async fn get_cart(
    State(state): State<AppState>,
    ctx: RequestContext,
    user: CurrentUser,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let cart = ctx
        .run(state.config.timeouts.db, state.orders.get_cart(&user.id))
        .await??;
    Ok(Json(ApiResponse::success(cart)))
}

pub async fn add_item(
    State(state): State<AppState>,
    ctx: RequestContext,
    user: CurrentUser,
    Json(payload): Json<AddCartItemRequest>,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let cart = ctx
        .run(
            state.config.timeouts.db,
            state.orders.add_item(&user.id, &payload.book_id, payload.quantity),
        )
        .await??;
    Ok(Json(ApiResponse::success(cart)))
}

pub async fn apply_promotion(
    State(state): State<AppState>,
    ctx: RequestContext,
    user: CurrentUser,
    Json(payload): Json<ApplyPromotionRequest>,
) -> AppResult<Json<ApiResponse<Cart>>> {
    let code = payload.code.as_deref().map(str::trim).filter(|c| !c.is_empty());
    let cart = ctx
        .run(state.config.timeouts.db, state.orders.apply_promotion(&user.id, code))
        .await??;
    Ok(Json(ApiResponse::success(cart)))
}

/// Place the order for the caller's cart and open its payment
pub async fn checkout(
    State(state): State<AppState>,
    ctx: RequestContext,
    user: CurrentUser,
    Json(payload): Json<CheckoutRequest>,
) -> AppResult<Json<ApiResponse<CheckoutResponse>>> {
    let ctx = ctx.with_user(&user.id);
    let response = state.orders.checkout(&ctx, &user.id, &payload).await?;
    Ok(Json(ApiResponse::success(response)))
}
