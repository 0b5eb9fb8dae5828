//! Payment coordinator
//!
//! Opens payments, verifies gateway callbacks and drives the order to its
//! paid (or released) state. Refunds run through an approval state machine
//! and are executed against the gateway by a background job.

mod coordinator;
pub mod gateway;
mod refund_client;
mod refunds;
pub mod signer;

pub use coordinator::{CallbackReply, PaymentCoordinator, PaymentSettings};
pub use refund_client::{HttpRefundGateway, LocalRefundGateway, RefundCall, RefundGateway, RefundGatewayError};
pub use refunds::RefundExecution;

use crate::context::DeadlineExceeded;
use crate::db::Transient;
use crate::db::repository::RepoError;
use crate::inventory::InventoryError;
use crate::jobs::JobError;
use crate::orders::OrderError;
use rust_decimal::Decimal;
use shared::error::{AppError, ErrorCode};
use shared::models::{OrderStatus, PaymentMethod, PaymentStatus, RefundStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Refund not found: {0}")]
    RefundNotFound(String),

    #[error("Order in status {0} is not awaiting payment")]
    NotPayable(OrderStatus),

    #[error("Order {0} no longer holds its stock")]
    StockReleased(String),

    #[error("Payment method {0:?} has no gateway")]
    Unsupported(PaymentMethod),

    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    #[error("Payment in status {0:?} cannot be refunded")]
    NotRefundable(PaymentStatus),

    #[error("Refund amount must be positive, got {0}")]
    InvalidRefundAmount(Decimal),

    #[error("Refund of {requested} exceeds the paid amount {paid}")]
    RefundAmountExceeded { requested: Decimal, paid: Decimal },

    #[error("Refund {from:?} cannot move to {to:?}")]
    InvalidRefundTransition { from: RefundStatus, to: RefundStatus },

    #[error("A refund is already open for payment {0}")]
    RefundInProgress(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error(transparent)]
    Order(Box<OrderError>),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Timeout(#[from] DeadlineExceeded),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl From<sqlx::Error> for PaymentError {
    fn from(err: sqlx::Error) -> Self {
        PaymentError::Repo(err.into())
    }
}

impl From<OrderError> for PaymentError {
    fn from(err: OrderError) -> Self {
        PaymentError::Order(Box::new(err))
    }
}

impl Transient for PaymentError {
    fn is_transient(&self) -> bool {
        match self {
            PaymentError::Repo(e) => e.is_transient(),
            PaymentError::Inventory(e) => e.is_transient(),
            PaymentError::Order(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::OrderNotFound(id) => AppError::new(ErrorCode::OrderNotFound).with_detail("order_id", id),
            PaymentError::PaymentNotFound(id) => {
                AppError::new(ErrorCode::PaymentNotFound).with_detail("payment_id", id)
            }
            PaymentError::RefundNotFound(id) => AppError::new(ErrorCode::RefundNotFound).with_detail("refund_id", id),
            PaymentError::NotPayable(status) => {
                AppError::new(ErrorCode::OrderNotPayable).with_detail("status", status.as_db())
            }
            e @ PaymentError::StockReleased(_) => AppError::with_message(ErrorCode::OrderNotPayable, e.to_string()),
            PaymentError::Unsupported(method) => {
                AppError::new(ErrorCode::UnsupportedPaymentMethod).with_detail("method", method.as_db())
            }
            PaymentError::InvalidCallback(msg) => AppError::validation(msg),
            PaymentError::NotRefundable(status) => AppError::with_message(
                ErrorCode::InvalidRefundTransition,
                "Only settled payments of paid orders can be refunded",
            )
            .with_detail("payment_status", status.as_db()),
            e @ PaymentError::InvalidRefundAmount(_) => AppError::validation(e.to_string()),
            PaymentError::RefundAmountExceeded { requested, paid } => {
                AppError::new(ErrorCode::RefundAmountExceeded)
                    .with_detail("requested", requested.to_string())
                    .with_detail("paid", paid.to_string())
            }
            PaymentError::InvalidRefundTransition { from, to } => AppError::new(ErrorCode::InvalidRefundTransition)
                .with_detail("from", from.as_db())
                .with_detail("to", to.as_db()),
            PaymentError::RefundInProgress(id) => {
                AppError::with_message(ErrorCode::AlreadyExists, "A refund is already open for this payment")
                    .with_detail("payment_id", id)
            }
            PaymentError::Gateway(msg) => {
                tracing::warn!(error = %msg, "Payment gateway failure");
                AppError::new(ErrorCode::GatewayError)
            }
            PaymentError::Order(e) => (*e).into(),
            PaymentError::Inventory(e) => e.into(),
            PaymentError::Job(e) => e.into(),
            PaymentError::Timeout(e) => e.into(),
            PaymentError::Repo(e) => e.into(),
        }
    }
}

pub type PaymentResult<T> = Result<T, PaymentError>;
