//! Order Model
//!
//! Orders move through a fixed state machine:
//!
//! ```text
//! pending   → confirmed | paid | cancelled
//! confirmed → paid | shipped (cash on delivery) | cancelled
//! paid      → shipped | refunded
//! shipped   → delivered
//! ```
//!
//! Every transition is applied as a compare-and-swap on `version`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::payment::{PaymentIntent, PaymentMethod};
use crate::error::ErrorCode;

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Paid,
    Cancelled,
    Shipped,
    Delivered,
    Refunded,
}

impl OrderStatus {
    /// Parse from database string value
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            "shipped" => Some(Self::Shipped),
            "delivered" => Some(Self::Delivered),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }

    /// Database string representation
    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Refunded => "refunded",
        }
    }

    /// Whether the state machine allows `self → next`
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Paid)
                | (Pending, Cancelled)
                | (Confirmed, Paid)
                | (Confirmed, Shipped)
                | (Confirmed, Cancelled)
                | (Paid, Shipped)
                | (Paid, Refunded)
                | (Shipped, Delivered)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled | Self::Refunded)
    }

    /// Cancellation is only possible before payment or before shipment
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db())
    }
}

/// Shipping address snapshot stored on the order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub recipient: String,
    pub phone: Option<String>,
    pub line1: String,
    pub city: String,
    pub country: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl ShippingAddress {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

/// Order entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub order_number: String,
    pub user_id: String,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping_fee: Decimal,
    pub total: Decimal,
    pub promotion_id: Option<String>,
    pub shipping_address: ShippingAddress,
    pub items: Vec<OrderItem>,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Order line with the warehouse its reservation is bound to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub order_id: String,
    pub book_id: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub warehouse_id: String,
}

/// One recorded state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusChange {
    pub order_id: String,
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub actor: String,
    pub reason: Option<String>,
    pub created_at: i64,
}

// =============================================================================
// Checkout DTOs
// =============================================================================

/// Checkout request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
}

/// Non-fatal notice returned alongside a successful checkout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutWarning {
    pub code: ErrorCode,
    pub message: String,
}

/// Checkout response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub order: Order,
    pub payment: PaymentIntent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<CheckoutWarning>,
}

/// A cart line whose price or availability changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChangedLine {
    pub book_id: String,
    pub snapshot_price: Decimal,
    /// `None` when the book no longer exists
    pub current_price: Option<Decimal>,
    pub active: bool,
}

/// A cart line no warehouse can serve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnavailableLine {
    pub book_id: String,
    pub quantity: i64,
}

/// Admin status advance request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusUpdate {
    pub status: OrderStatus,
    /// Expected version; omitted means "current"
    pub version: Option<i64>,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Shipped));
        assert!(OrderStatus::Shipped.can_transition_to(OrderStatus::Delivered));
    }

    #[test]
    fn paid_orders_cannot_be_cancelled() {
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Paid.is_cancellable());
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Refunded));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        let all = [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Paid,
            OrderStatus::Cancelled,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Refunded,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn status_db_roundtrip() {
        for s in ["pending", "confirmed", "paid", "cancelled", "shipped", "delivered", "refunded"] {
            assert_eq!(OrderStatus::from_db(s).map(|v| v.as_db()), Some(s));
        }
    }
}
