//! Authentication and authorization
//!
//! - [`JwtService`]: HS256 access tokens
//! - [`CurrentUser`]: caller identity, also an axum extractor
//! - [`require_auth`], [`require_admin`], [`require_service`]: middleware

mod extractor;
pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, CurrentUser, JwtError, JwtService, ROLE_ADMIN, ROLE_CUSTOMER};
pub use middleware::{SERVICE_TOKEN_HEADER, require_admin, require_auth, require_service};
