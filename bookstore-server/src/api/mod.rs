//! HTTP API
//!
//! Route groups by caller:
//! - public: health, availability, warehouse lookup, gateway callbacks
//! - user (bearer JWT): cart, orders, payments
//! - admin (bearer JWT, admin role): order status, refund decisions
//! - service (`x-service-token`): inventory primitives, dead letters

pub mod admin;
pub mod cart;
pub mod health;
pub mod inventory;
pub mod middleware;
pub mod orders;
pub mod payments;
pub mod warehouses;
pub mod webhooks;

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use http::{HeaderName, HeaderValue};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth::{require_admin, require_auth, require_service};
use crate::state::AppState;
use middleware::REQUEST_ID_HEADER;

const MAX_IN_FLIGHT: usize = 512;

/// Request id generator, used when the caller sent none
#[derive(Clone)]
struct XRequestId;

impl MakeRequestId for XRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// All routes with their auth layers (no outer middleware, no state)
pub fn build_router(state: &AppState) -> Router<AppState> {
    let user = Router::new()
        .merge(cart::router())
        .merge(orders::router())
        .merge(payments::router())
        .merge(admin::router().route_layer(from_fn(require_admin)))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let service = Router::new()
        .merge(inventory::service_router())
        .merge(admin::service_router())
        .route_layer(from_fn_with_state(state.clone(), require_service));

    Router::new()
        .merge(health::router())
        .merge(inventory::public_router())
        .merge(warehouses::router())
        .merge(webhooks::router())
        .merge(user)
        .merge(service)
}

/// Fully configured application; used by the HTTP server and by tests
pub fn build_app(state: AppState) -> Router {
    build_router(&state)
        // innermost: needs the request id set below
        .layer(from_fn_with_state(state.clone(), middleware::request_context))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(REQUEST_ID_HEADER)))
        .layer(SetRequestIdLayer::new(HeaderName::from_static(REQUEST_ID_HEADER), XRequestId))
        .layer(CorsLayer::permissive())
        .layer(ConcurrencyLimitLayer::new(MAX_IN_FLIGHT))
        .with_state(state)
}
