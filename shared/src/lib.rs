//! Shared types for the bookstore backend
//!
//! Common types used by both the API process and the background worker:
//! the unified error system, domain models and small utilities.

pub mod error;
pub mod models;
pub mod util;

// Re-exports
pub use error::{ApiResponse, AppError, AppResult, ErrorCode, ErrorKind};
pub use serde::{Deserialize, Serialize};
