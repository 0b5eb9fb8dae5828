//! Repository Module
//!
//! Free async functions over `&SqlitePool`, or `&mut SqliteConnection` when
//! the call must join an open transaction. Rows are read into `*Row`
//! structs and mapped explicitly with `into_model()`.

pub mod audit;
pub mod books;
pub mod carts;
pub mod checkout_events;
pub mod inventory;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod promotions;
pub mod refunds;
pub mod users;

use rust_decimal::Decimal;
use shared::error::{AppError, ErrorCode};
use std::str::FromStr;
use thiserror::Error;

/// Repository error types
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// `SQLITE_BUSY` / `SQLITE_LOCKED`; safe to retry
    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// SQLite primary result codes for lock contention (extended codes keep the
/// primary code in the low byte)
const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => RepoError::NotFound(err.to_string()),
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    return RepoError::Duplicate(db_err.message().to_string());
                }
                let primary = db_err
                    .code()
                    .and_then(|c| c.parse::<i64>().ok())
                    .map(|c| c & 0xff);
                match primary {
                    Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => {
                        RepoError::Busy(db_err.message().to_string())
                    }
                    _ => RepoError::Database(err.to_string()),
                }
            }
            sqlx::Error::PoolTimedOut => RepoError::Busy(err.to_string()),
            _ => RepoError::Database(err.to_string()),
        }
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound(msg) => AppError::with_message(ErrorCode::NotFound, msg),
            RepoError::Duplicate(msg) => {
                tracing::debug!(error = %msg, "Duplicate key");
                AppError::new(ErrorCode::AlreadyExists)
            }
            RepoError::Busy(msg) => {
                tracing::warn!(error = %msg, "Database busy");
                AppError::new(ErrorCode::DependencyUnavailable)
            }
            RepoError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                AppError::new(ErrorCode::DatabaseError)
            }
        }
    }
}

/// Result type for repository operations
pub type RepoResult<T> = Result<T, RepoError>;

/// Parse a TEXT money column
pub(crate) fn parse_decimal(value: &str, column: &str) -> RepoResult<Decimal> {
    Decimal::from_str(value)
        .map_err(|e| RepoError::Database(format!("Invalid decimal in {column}: {value:?} ({e})")))
}

pub(crate) fn parse_opt_decimal(value: Option<&str>, column: &str) -> RepoResult<Option<Decimal>> {
    value.map(|v| parse_decimal(v, column)).transpose()
}

/// Unknown enum text in a status column
pub(crate) fn bad_enum(column: &str, value: &str) -> RepoError {
    RepoError::Database(format!("Unknown {column} value: {value:?}"))
}
