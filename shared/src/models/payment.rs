//! Payment & Refund Models

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Payment method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Vnpay,
    Momo,
    Cod,
}

impl PaymentMethod {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "vnpay" => Some(Self::Vnpay),
            "momo" => Some(Self::Momo),
            "cod" => Some(Self::Cod),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Vnpay => "vnpay",
            Self::Momo => "momo",
            Self::Cod => "cod",
        }
    }

    /// Whether the method is settled through an external gateway callback
    pub fn is_online(&self) -> bool {
        !matches!(self, Self::Cod)
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db())
    }
}

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created, no gateway interaction yet (COD stays here until delivery)
    Initiated,
    /// Redirect URL handed out, waiting for the gateway callback
    Pending,
    Succeeded,
    Failed,
    RefundRequested,
    Refunded,
}

impl PaymentStatus {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(Self::Initiated),
            "pending" => Some(Self::Pending),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "refund_requested" => Some(Self::RefundRequested),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::RefundRequested => "refund_requested",
            Self::Refunded => "refunded",
        }
    }
}

/// Payment entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub status: PaymentStatus,
    /// Reference sent to the gateway and echoed back in callbacks
    pub gateway_txn_ref: String,
    pub idempotency_key: String,
    pub redirect_url: Option<String>,
    /// Gateway-side transaction id from the callback
    pub gateway_transaction_no: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// What the client needs to complete a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub payment_id: String,
    pub order_id: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub amount: Decimal,
    /// `None` for cash on delivery
    pub redirect_url: Option<String>,
}

impl From<&Payment> for PaymentIntent {
    fn from(p: &Payment) -> Self {
        Self {
            payment_id: p.id.clone(),
            order_id: p.order_id.clone(),
            method: p.method,
            status: p.status,
            amount: p.amount,
            redirect_url: p.redirect_url.clone(),
        }
    }
}

/// Create payment request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub order_id: String,
    pub method: PaymentMethod,
}

// =============================================================================
// Refunds
// =============================================================================

/// Refund status
///
/// `requested → approved → succeeded | failed`, or `requested → rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Requested,
    Approved,
    Rejected,
    Succeeded,
    Failed,
}

impl RefundStatus {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "requested" => Some(Self::Requested),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: RefundStatus) -> bool {
        use RefundStatus::*;
        matches!(
            (self, next),
            (Requested, Approved)
                | (Requested, Rejected)
                | (Approved, Succeeded)
                | (Approved, Failed)
        )
    }
}

/// Refund entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub payment_id: String,
    pub order_id: String,
    pub amount: Decimal,
    pub status: RefundStatus,
    pub reason: Option<String>,
    pub requested_by: String,
    pub decided_by: Option<String>,
    pub gateway_ref: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Refund request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    /// Defaults to the full payment amount
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
}

/// Admin approve / reject body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefundDecision {
    pub reason: Option<String>,
}
