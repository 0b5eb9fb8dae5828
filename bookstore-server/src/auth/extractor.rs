//! `CurrentUser` extractor
//!
//! Reuses the identity injected by [`require_auth`](super::require_auth)
//! when present, otherwise validates the token itself.

use axum::{extract::FromRequestParts, http::request::Parts};
use shared::AppError;

use super::CurrentUser;
use super::middleware::authenticate;
use crate::state::AppState;

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }
        let user = authenticate(state, &parts.headers, &parts.uri)?;
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}
