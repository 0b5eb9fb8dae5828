//! Order API
//!
//! Customers read and cancel their own orders. Status changes beyond
//! cancellation live under the admin router.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use shared::models::{Order, OrderStatusChange};
use shared::{ApiResponse, AppResult};

use crate::auth::CurrentUser;
use crate::context::RequestContext;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().nest("/api/v1/orders", routes())
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(get_by_id))
        .route("/{id}/history", get(history))
        .route("/{id}/cancel", post(cancel))
}

pub async fn get_by_id(
    State(state): State<AppState>,
    ctx: RequestContext,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let order = ctx
        .run(state.config.timeouts.db, state.orders.get_order(&user.id, &id))
        .await??;
    Ok(Json(ApiResponse::success(order)))
}

/// Status changes, oldest first
pub async fn history(
    State(state): State<AppState>,
    ctx: RequestContext,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Vec<OrderStatusChange>>>> {
    let changes = ctx
        .run(state.config.timeouts.db, async {
            // ownership check first
            state.orders.get_order(&user.id, &id).await?;
            state.orders.history(&id).await
        })
        .await??;
    Ok(Json(ApiResponse::success(changes)))
}

pub async fn cancel(
    State(state): State<AppState>,
    ctx: RequestContext,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let ctx = ctx.with_user(&user.id);
    let order = state.orders.cancel(&ctx, &user.id, &id).await?;
    Ok(Json(ApiResponse::success_with_message("Order cancelled", order)))
}
