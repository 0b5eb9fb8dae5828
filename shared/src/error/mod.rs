//! Unified error system for the bookstore backend
//!
//! This module provides:
//! - [`ErrorCode`]: machine-readable error codes shared by API and worker
//! - [`ErrorKind`]: classification of codes (validation, conflict, ...)
//! - [`AppError`]: error type with code, message and structured details
//! - [`ApiResponse`]: unified API response envelope
//!
//! Each code maps to exactly one kind, and each kind to exactly one HTTP
//! status. The mapping happens once, when an `AppError` is turned into a
//! response.
//!
//! # Example
//!
//! ```
//! use shared::error::{AppError, ErrorCode, ApiResponse};
//!
//! let err = AppError::with_message(ErrorCode::Insufficient, "only 2 left")
//!     .with_detail("available", 2);
//! let response = ApiResponse::<()>::error(&err);
//! assert_eq!(response.code, ErrorCode::Insufficient);
//! ```

mod codes;
mod http;
mod kind;
mod types;

pub use codes::ErrorCode;
pub use kind::ErrorKind;
pub use types::{ApiResponse, AppError, AppResult};
