//! Authentication middleware
//!
//! - [`require_auth`]: user routes, `Authorization: Bearer <jwt>`
//! - [`require_admin`]: layered after `require_auth`
//! - [`require_service`]: service-to-service routes, `x-service-token`

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use shared::{AppError, ErrorCode};

use super::{CurrentUser, JwtError, JwtService};
use crate::security_log;
use crate::state::AppState;

pub const SERVICE_TOKEN_HEADER: &str = "x-service-token";

pub(super) fn authenticate(state: &AppState, headers: &http::HeaderMap, uri: &http::Uri) -> Result<CurrentUser, AppError> {
    let header = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match header {
        Some(header) => JwtService::extract_from_header(header)
            .ok_or_else(|| AppError::with_message(ErrorCode::TokenInvalid, "Invalid authorization header"))?,
        None => {
            security_log!(WARN, "auth_missing", uri = %uri);
            return Err(AppError::not_authenticated());
        }
    };

    match state.get_jwt_service().validate_token(token) {
        Ok(claims) => Ok(CurrentUser::from(claims)),
        Err(e) => {
            security_log!(WARN, "auth_failed", error = %e, uri = %uri);
            match e {
                JwtError::ExpiredToken => Err(AppError::new(ErrorCode::TokenExpired)),
                _ => Err(AppError::new(ErrorCode::TokenInvalid)),
            }
        }
    }
}

/// Validate the bearer token and inject [`CurrentUser`] into the request
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if req.method() == http::Method::OPTIONS {
        return Ok(next.run(req).await);
    }
    let user = authenticate(&state, req.headers(), req.uri())?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

pub async fn require_admin(req: Request, next: Next) -> Result<Response, AppError> {
    let user = req
        .extensions()
        .get::<CurrentUser>()
        .ok_or_else(AppError::not_authenticated)?;
    if !user.is_admin() {
        security_log!(WARN, "admin_required", user_id = %user.id, role = %user.role);
        return Err(AppError::new(ErrorCode::AdminRequired));
    }
    Ok(next.run(req).await)
}

fn digest(s: &[u8]) -> [u8; 32] {
    Sha256::digest(s).into()
}

/// Shared-secret check for internal callers
pub async fn require_service(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = req
        .headers()
        .get(SERVICE_TOKEN_HEADER)
        .map(|v| v.as_bytes())
        .unwrap_or_default();

    // compare fixed-size digests, not the raw secrets
    if presented.is_empty() || digest(presented) != digest(state.config.service_token.as_bytes()) {
        security_log!(WARN, "service_token_rejected", uri = %req.uri(), present = !presented.is_empty());
        return Err(AppError::permission_denied("Invalid service token"));
    }
    Ok(next.run(req).await)
}
