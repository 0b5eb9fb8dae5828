//! Book Model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Catalog entry as seen by checkout (read-only here)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub price: Decimal,
    pub active: bool,
    pub updated_at: i64,
}
