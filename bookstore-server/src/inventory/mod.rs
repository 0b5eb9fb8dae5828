//! Reservation engine
//!
//! Owns the `(warehouse, book)` stock counters. Higher layers compose the
//! primitives in [`ops`] inside their own transactions; [`ReservationEngine`]
//! runs them standalone for the service endpoints and the worker.
//!
//! Conservation: `0 <= reserved <= quantity` at every quiescent point, and
//! the `reserved` counter always includes every reservation record.

mod engine;
pub mod geo;
pub mod ops;

pub use engine::ReservationEngine;

use crate::db::Transient;
use crate::db::repository::RepoError;
use shared::error::{AppError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Book {book_id} is not stocked in warehouse {warehouse_id}")]
    OutOfStock { warehouse_id: String, book_id: String },

    #[error("Insufficient stock of {book_id} in {warehouse_id}: requested {requested}")]
    Insufficient {
        warehouse_id: String,
        book_id: String,
        requested: i64,
    },

    #[error("Order {order_id} already holds a reservation for {book_id}")]
    DuplicateReservation { order_id: String, book_id: String },

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i64),

    #[error("Reservation ttl out of range: {0:?}")]
    InvalidTtl(std::time::Duration),

    #[error("Warehouse not found: {0}")]
    WarehouseNotFound(String),

    #[error("Stock adjustment would leave quantity {quantity} with {reserved} reserved")]
    AdjustmentRejected { quantity: i64, reserved: i64 },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl From<sqlx::Error> for InventoryError {
    fn from(err: sqlx::Error) -> Self {
        InventoryError::Repo(err.into())
    }
}

impl Transient for InventoryError {
    fn is_transient(&self) -> bool {
        matches!(self, InventoryError::Repo(e) if e.is_transient())
    }
}

impl From<InventoryError> for AppError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::OutOfStock { warehouse_id, book_id } => {
                AppError::new(ErrorCode::OutOfStock)
                    .with_detail("warehouse_id", warehouse_id)
                    .with_detail("book_id", book_id)
            }
            InventoryError::Insufficient {
                warehouse_id,
                book_id,
                requested,
            } => AppError::new(ErrorCode::Insufficient)
                .with_detail("warehouse_id", warehouse_id)
                .with_detail("book_id", book_id)
                .with_detail("requested", requested),
            InventoryError::DuplicateReservation { order_id, book_id } => {
                AppError::new(ErrorCode::DuplicateReservation)
                    .with_detail("order_id", order_id)
                    .with_detail("book_id", book_id)
            }
            InventoryError::InvalidQuantity(q) => {
                AppError::new(ErrorCode::InvalidQuantity).with_detail("quantity", q)
            }
            e @ InventoryError::InvalidTtl(_) => AppError::validation(e.to_string()),
            InventoryError::WarehouseNotFound(id) => {
                AppError::new(ErrorCode::WarehouseNotFound).with_detail("warehouse_id", id)
            }
            e @ InventoryError::AdjustmentRejected { .. } => {
                AppError::with_message(ErrorCode::Insufficient, e.to_string())
            }
            InventoryError::InvariantViolation(_) => AppError::new(ErrorCode::InvariantViolation),
            InventoryError::Repo(e) => e.into(),
        }
    }
}

pub type InventoryResult<T> = Result<T, InventoryError>;
