//! Warehouse lookup

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde::Deserialize;
use shared::models::NearestWarehouse;
use shared::{ApiResponse, AppError, AppResult, ErrorCode};

use crate::context::RequestContext;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/warehouses/nearest-with-stock", get(nearest_with_stock))
}

#[derive(Debug, Deserialize)]
pub struct NearestQuery {
    pub book_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

fn default_quantity() -> i64 {
    1
}

/// Closest active warehouse holding `quantity` units
pub async fn nearest_with_stock(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<NearestQuery>,
) -> AppResult<Json<ApiResponse<NearestWarehouse>>> {
    let destination = query.lat.zip(query.lng);
    let nearest = ctx
        .run(
            state.config.timeouts.db,
            state.engine.find_nearest_with_stock(&query.book_id, destination, query.quantity),
        )
        .await??
        .ok_or_else(|| {
            AppError::with_message(ErrorCode::OutOfStock, "No warehouse holds the requested quantity")
                .with_detail("book_id", query.book_id.clone())
                .with_detail("quantity", query.quantity)
        })?;
    Ok(Json(ApiResponse::success(nearest)))
}
