//! Request-scoped context middleware

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};

use crate::context::RequestContext;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Budget for routes mounted without [`request_context`]
const FALLBACK_BUDGET: Duration = Duration::from_secs(30);

/// First hop of `x-forwarded-for`, else `x-real-ip`
fn client_ip(headers: &http::HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    forwarded
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::to_string)
}

/// Build the [`RequestContext`] (request id, client ip, deadline) and make
/// it available to handlers as an extension
pub async fn request_context(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(shared::util::new_id);
    let ctx = RequestContext::new(request_id, state.config.timeouts.request).with_client_ip(client_ip(req.headers()));
    req.extensions_mut().insert(ctx);
    next.run(req).await
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(|| RequestContext::new(shared::util::new_id(), FALLBACK_BUDGET)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    #[test]
    fn client_ip_prefers_the_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.2".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("198.51.100.2"));
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }
}
