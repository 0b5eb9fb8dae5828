//! Cart Model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Cart lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartStatus {
    Active,
    Converted,
    Abandoned,
}

impl CartStatus {
    /// Parse from database string value
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "converted" => Some(Self::Converted),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }

    /// Database string representation
    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Converted => "converted",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Cart entity
///
/// Owned either by a user (`user_id`) or an anonymous session (`session_id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub status: CartStatus,
    pub applied_promotion_id: Option<String>,
    pub items: Vec<CartItem>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Cart line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub cart_id: String,
    pub book_id: String,
    pub quantity: i64,
    pub unit_price_snapshot: Decimal,
}

/// Add (or top up) a cart line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCartItemRequest {
    pub book_id: String,
    pub quantity: i64,
}

/// Apply a promotion code; `None` clears the applied one
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyPromotionRequest {
    #[serde(default)]
    pub code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_db_roundtrip() {
        for s in [CartStatus::Active, CartStatus::Converted, CartStatus::Abandoned] {
            assert_eq!(CartStatus::from_db(s.as_db()), Some(s));
        }
        assert_eq!(CartStatus::from_db("deleted"), None);
    }
}
