//! Unified error codes
//!
//! Codes are grouped by numeric range:
//! - 0xxx: General
//! - 1xxx: Authentication
//! - 2xxx: Permission
//! - 4xxx: Cart & order
//! - 5xxx: Payment & refund
//! - 6xxx: Inventory
//! - 9xxx: System
//!
//! On the wire a code is its snake_case name (`"out_of_stock"`), which is
//! what clients and gateways match on.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::kind::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource already exists
    AlreadyExists = 4,
    /// Invalid request
    InvalidRequest = 5,
    /// Optimistic concurrency check failed
    VersionConflict = 6,

    // ==================== 1xxx: Auth ====================
    /// User is not authenticated
    NotAuthenticated = 1001,
    /// Token is invalid
    TokenInvalid = 1002,
    /// Token has expired
    TokenExpired = 1003,

    // ==================== 2xxx: Permission ====================
    /// Permission denied
    PermissionDenied = 2001,
    /// Admin role required
    AdminRequired = 2002,

    // ==================== 4xxx: Cart & Order ====================
    /// No active cart for the caller
    CartNotFound = 4001,
    /// Checkout of a cart without items
    CartEmpty = 4002,
    /// Line quantity is zero or negative
    InvalidQuantity = 4003,
    /// A line's price or availability changed since it was added
    PriceChanged = 4004,
    /// The applied promotion is no longer valid
    PromotionInvalidated = 4005,
    /// Order not found
    OrderNotFound = 4006,
    /// Transition not allowed by the order state machine
    InvalidOrderTransition = 4007,
    /// Order can no longer be cancelled
    OrderNotCancellable = 4008,
    /// Online order has not been paid yet
    OrderNotPaid = 4009,

    // ==================== 5xxx: Payment & Refund ====================
    /// Payment not found
    PaymentNotFound = 5001,
    /// Gateway callback signature mismatch
    InvalidSignature = 5002,
    /// Callback amount differs from the order total
    AmountMismatch = 5003,
    /// Payment method not supported
    UnsupportedPaymentMethod = 5004,
    /// Order is not in a payable state
    OrderNotPayable = 5005,
    /// Refund not found
    RefundNotFound = 5006,
    /// Transition not allowed by the refund state machine
    InvalidRefundTransition = 5007,
    /// Refund amount exceeds the refundable balance
    RefundAmountExceeded = 5008,
    /// Payment gateway rejected or failed the request
    GatewayError = 5009,

    // ==================== 6xxx: Inventory ====================
    /// Inventory row missing or warehouse inactive
    OutOfStock = 6001,
    /// Not enough available stock
    Insufficient = 6002,
    /// Order already holds a reservation for this line
    DuplicateReservation = 6003,
    /// Warehouse not found
    WarehouseNotFound = 6004,
    /// Book not found
    BookNotFound = 6005,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Database error
    DatabaseError = 9002,
    /// Configuration error
    ConfigError = 9003,
    /// A dependency (DB, keyspace, gateway, SMTP) is unavailable
    DependencyUnavailable = 9004,
    /// Deadline exceeded
    Timeout = 9005,
    /// An invariant was violated; never auto-recovers
    InvariantViolation = 9006,
}

impl ErrorCode {
    /// Numeric value of this code
    pub fn value(&self) -> u16 {
        *self as u16
    }

    /// Machine-readable name (same as the serialized form)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Unknown => "unknown",
            Self::ValidationFailed => "validation_failed",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::InvalidRequest => "invalid_request",
            Self::VersionConflict => "version_conflict",
            Self::NotAuthenticated => "not_authenticated",
            Self::TokenInvalid => "token_invalid",
            Self::TokenExpired => "token_expired",
            Self::PermissionDenied => "permission_denied",
            Self::AdminRequired => "admin_required",
            Self::CartNotFound => "cart_not_found",
            Self::CartEmpty => "cart_empty",
            Self::InvalidQuantity => "invalid_quantity",
            Self::PriceChanged => "price_changed",
            Self::PromotionInvalidated => "promotion_invalidated",
            Self::OrderNotFound => "order_not_found",
            Self::InvalidOrderTransition => "invalid_order_transition",
            Self::OrderNotCancellable => "order_not_cancellable",
            Self::OrderNotPaid => "order_not_paid",
            Self::PaymentNotFound => "payment_not_found",
            Self::InvalidSignature => "invalid_signature",
            Self::AmountMismatch => "amount_mismatch",
            Self::UnsupportedPaymentMethod => "unsupported_payment_method",
            Self::OrderNotPayable => "order_not_payable",
            Self::RefundNotFound => "refund_not_found",
            Self::InvalidRefundTransition => "invalid_refund_transition",
            Self::RefundAmountExceeded => "refund_amount_exceeded",
            Self::GatewayError => "gateway_error",
            Self::OutOfStock => "out_of_stock",
            Self::Insufficient => "insufficient",
            Self::DuplicateReservation => "duplicate_reservation",
            Self::WarehouseNotFound => "warehouse_not_found",
            Self::BookNotFound => "book_not_found",
            Self::InternalError => "internal_error",
            Self::DatabaseError => "database_error",
            Self::ConfigError => "config_error",
            Self::DependencyUnavailable => "dependency_unavailable",
            Self::Timeout => "timeout",
            Self::InvariantViolation => "invariant_violation",
        }
    }

    /// Default human-readable message
    pub fn message(&self) -> &'static str {
        match self {
            Self::Success => "Operation completed successfully",
            Self::Unknown => "An unknown error occurred",
            Self::ValidationFailed => "Validation failed",
            Self::NotFound => "Resource not found",
            Self::AlreadyExists => "Resource already exists",
            Self::InvalidRequest => "Invalid request",
            Self::VersionConflict => "Resource was modified concurrently, please retry",
            Self::NotAuthenticated => "Authentication required",
            Self::TokenInvalid => "Invalid token",
            Self::TokenExpired => "Token expired",
            Self::PermissionDenied => "Permission denied",
            Self::AdminRequired => "Admin role required",
            Self::CartNotFound => "Cart not found",
            Self::CartEmpty => "Cart is empty",
            Self::InvalidQuantity => "Quantity must be positive",
            Self::PriceChanged => "Prices changed since items were added to the cart",
            Self::PromotionInvalidated => "Promotion is no longer valid and was removed",
            Self::OrderNotFound => "Order not found",
            Self::InvalidOrderTransition => "Order status transition not allowed",
            Self::OrderNotCancellable => "Order can no longer be cancelled",
            Self::OrderNotPaid => "Order must be paid before fulfilment",
            Self::PaymentNotFound => "Payment not found",
            Self::InvalidSignature => "Invalid signature",
            Self::AmountMismatch => "Paid amount does not match the order total",
            Self::UnsupportedPaymentMethod => "Payment method not supported",
            Self::OrderNotPayable => "Order is not awaiting payment",
            Self::RefundNotFound => "Refund not found",
            Self::InvalidRefundTransition => "Refund status transition not allowed",
            Self::RefundAmountExceeded => "Refund amount exceeds refundable balance",
            Self::GatewayError => "Payment gateway error",
            Self::OutOfStock => "Out of stock",
            Self::Insufficient => "Insufficient stock",
            Self::DuplicateReservation => "Reservation already exists for this order line",
            Self::WarehouseNotFound => "Warehouse not found",
            Self::BookNotFound => "Book not found",
            Self::InternalError => "Internal server error",
            Self::DatabaseError => "Database error",
            Self::ConfigError => "Configuration error",
            Self::DependencyUnavailable => "Service temporarily unavailable",
            Self::Timeout => "Request timed out",
            Self::InvariantViolation => "Internal consistency error",
        }
    }

    /// Classification of this code
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Success => ErrorKind::None,

            Self::ValidationFailed
            | Self::InvalidRequest
            | Self::CartEmpty
            | Self::InvalidQuantity
            | Self::UnsupportedPaymentMethod
            | Self::InvalidSignature => ErrorKind::Validation,

            Self::NotAuthenticated | Self::TokenInvalid | Self::TokenExpired => ErrorKind::Auth,

            Self::PermissionDenied | Self::AdminRequired => ErrorKind::Permission,

            Self::NotFound
            | Self::CartNotFound
            | Self::OrderNotFound
            | Self::PaymentNotFound
            | Self::RefundNotFound
            | Self::WarehouseNotFound
            | Self::BookNotFound => ErrorKind::NotFound,

            Self::AlreadyExists | Self::VersionConflict | Self::DuplicateReservation => {
                ErrorKind::Conflict
            }

            Self::PriceChanged
            | Self::PromotionInvalidated
            | Self::InvalidOrderTransition
            | Self::OrderNotCancellable
            | Self::OrderNotPaid
            | Self::AmountMismatch
            | Self::OrderNotPayable
            | Self::InvalidRefundTransition
            | Self::RefundAmountExceeded
            | Self::OutOfStock
            | Self::Insufficient => ErrorKind::NotEligible,

            Self::DependencyUnavailable | Self::GatewayError => ErrorKind::Dependency,

            Self::Timeout => ErrorKind::Timeout,

            Self::InvariantViolation => ErrorKind::Fatal,

            Self::Unknown | Self::InternalError | Self::DatabaseError | Self::ConfigError => {
                ErrorKind::Internal
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
