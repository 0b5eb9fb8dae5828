//! Order pipeline
//!
//! Turns a cart into an order (checkout), and moves orders through their
//! state machine (cancel, admin advance, auto-release). Every status change
//! is a compare-and-swap on `orders.version` plus one history row, written in
//! the same transaction.

mod cart;
mod checkout;
pub mod lifecycle;
pub mod pricing;

pub use checkout::{CheckoutSettings, OrderService};
pub use lifecycle::ReleaseOutcome;

use crate::context::DeadlineExceeded;
use crate::db::Transient;
use crate::db::repository::RepoError;
use crate::inventory::InventoryError;
use crate::jobs::JobError;
use crate::payments::PaymentError;
use shared::error::{AppError, ErrorCode};
use shared::models::{OrderStatus, PriceChangedLine, UnavailableLine};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Cart not found")]
    CartNotFound,

    #[error("Cart is empty")]
    CartEmpty,

    #[error("Cart was checked out concurrently")]
    CartChanged,

    #[error("Invalid quantity {quantity} for {book_id}")]
    InvalidQuantity { book_id: String, quantity: i64 },

    #[error("Book not found: {0}")]
    BookNotFound(String),

    #[error("Prices changed for {} line(s)", .0.len())]
    PriceChanged(Vec<PriceChangedLine>),

    #[error("No warehouse can serve {} line(s)", .0.len())]
    OutOfStock(Vec<UnavailableLine>),

    #[error("Promotion {0} cannot be applied: {1}")]
    PromotionRejected(String, String),

    #[error("Promotion not found: {0}")]
    PromotionNotFound(String),

    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Order {from} cannot move to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order in status {0} cannot be cancelled")]
    NotCancellable(OrderStatus),

    #[error("Order {0} is paid online and has no settled payment")]
    NotPaid(String),

    #[error("Order was modified concurrently")]
    VersionConflict,

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Payment(Box<PaymentError>),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Timeout(#[from] DeadlineExceeded),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl From<sqlx::Error> for OrderError {
    fn from(err: sqlx::Error) -> Self {
        OrderError::Repo(err.into())
    }
}

impl From<PaymentError> for OrderError {
    fn from(err: PaymentError) -> Self {
        OrderError::Payment(Box::new(err))
    }
}

impl Transient for OrderError {
    fn is_transient(&self) -> bool {
        match self {
            OrderError::Repo(e) => e.is_transient(),
            OrderError::Inventory(e) => e.is_transient(),
            _ => false,
        }
    }
}

fn to_value<T: serde::Serialize>(v: &T) -> serde_json::Value {
    serde_json::to_value(v).unwrap_or_default()
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::CartNotFound => AppError::new(ErrorCode::CartNotFound),
            OrderError::CartEmpty => AppError::new(ErrorCode::CartEmpty),
            OrderError::CartChanged => {
                AppError::with_message(ErrorCode::VersionConflict, "Cart was checked out concurrently")
            }
            OrderError::InvalidQuantity { book_id, quantity } => AppError::new(ErrorCode::InvalidQuantity)
                .with_detail("book_id", book_id)
                .with_detail("quantity", quantity),
            OrderError::BookNotFound(id) => AppError::new(ErrorCode::BookNotFound).with_detail("book_id", id),
            OrderError::PriceChanged(lines) => {
                AppError::new(ErrorCode::PriceChanged).with_detail("lines", to_value(&lines))
            }
            OrderError::OutOfStock(lines) => AppError::with_message(
                ErrorCode::OutOfStock,
                "Some items cannot be shipped from any warehouse",
            )
            .with_detail("lines", to_value(&lines)),
            OrderError::PromotionRejected(code, why) => {
                AppError::with_message(ErrorCode::PromotionInvalidated, why).with_detail("code", code)
            }
            OrderError::PromotionNotFound(code) => AppError::not_found(format!("Promotion {code}")),
            OrderError::NotFound(id) => AppError::new(ErrorCode::OrderNotFound).with_detail("order_id", id),
            OrderError::InvalidTransition { from, to } => AppError::new(ErrorCode::InvalidOrderTransition)
                .with_detail("from", from.as_db())
                .with_detail("to", to.as_db()),
            OrderError::NotCancellable(status) => {
                AppError::new(ErrorCode::OrderNotCancellable).with_detail("status", status.as_db())
            }
            OrderError::NotPaid(id) => AppError::new(ErrorCode::OrderNotPaid).with_detail("order_id", id),
            OrderError::VersionConflict => AppError::new(ErrorCode::VersionConflict),
            OrderError::Inventory(e) => e.into(),
            OrderError::Payment(e) => (*e).into(),
            OrderError::Job(e) => e.into(),
            OrderError::Timeout(e) => e.into(),
            OrderError::Repo(e) => e.into(),
        }
    }
}

pub type OrderResult<T> = Result<T, OrderError>;
