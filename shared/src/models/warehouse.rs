//! Warehouse & Inventory Models

use serde::{Deserialize, Serialize};

/// Warehouse entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: String,
    pub code: String,
    pub name: String,
    pub active: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Warehouse {
    /// Coordinates, when both are present
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

/// Stock counters for one (warehouse, book)
///
/// `reserved <= quantity` and both non-negative at every quiescent point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub quantity: i64,
    pub reserved: i64,
}

impl StockLevel {
    pub fn available(&self) -> i64 {
        self.quantity - self.reserved
    }

    /// Whether the counters satisfy the conservation invariant
    pub fn is_consistent(&self) -> bool {
        self.quantity >= 0 && self.reserved >= 0 && self.reserved <= self.quantity
    }
}

/// Inventory row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseInventory {
    pub warehouse_id: String,
    pub book_id: String,
    pub quantity: i64,
    pub reserved: i64,
    pub updated_at: i64,
}

impl WarehouseInventory {
    pub fn level(&self) -> StockLevel {
        StockLevel {
            quantity: self.quantity,
            reserved: self.reserved,
        }
    }

    pub fn available(&self) -> i64 {
        self.level().available()
    }
}

/// Reservation record tied to an order line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub order_id: String,
    pub warehouse_id: String,
    pub book_id: String,
    pub quantity: i64,
    pub expires_at: i64,
    pub created_at: i64,
}

/// Available stock in a single warehouse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseStock {
    pub warehouse_id: String,
    pub warehouse_code: String,
    pub available: i64,
}

/// Aggregate availability of a book across active warehouses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    pub book_id: String,
    pub requested: i64,
    pub total_available: i64,
    pub sufficient: bool,
    pub warehouses: Vec<WarehouseStock>,
}

/// Nearest warehouse able to serve a line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestWarehouse {
    pub warehouse: Warehouse,
    pub available: i64,
    /// Great-circle distance, `None` when either side has no coordinates
    pub distance_km: Option<f64>,
}

/// Hold stock for an order at one warehouse
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveStockRequest {
    pub order_id: String,
    pub warehouse_id: String,
    pub book_id: String,
    pub quantity: i64,
    /// Hold duration, defaults to the configured reservation TTL
    #[serde(default)]
    pub ttl_minutes: Option<i64>,
}

/// Release or sell every hold of an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStockRequest {
    pub order_id: String,
}

/// Restock (positive) or write off (negative)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustStockRequest {
    pub warehouse_id: String,
    pub book_id: String,
    pub delta: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_is_quantity_minus_reserved() {
        let level = StockLevel {
            quantity: 5,
            reserved: 2,
        };
        assert_eq!(level.available(), 3);
        assert!(level.is_consistent());
    }

    #[test]
    fn over_reserved_is_inconsistent() {
        let level = StockLevel {
            quantity: 1,
            reserved: 2,
        };
        assert!(!level.is_consistent());
    }

    #[test]
    fn coordinates_need_both_parts() {
        let mut w = Warehouse {
            id: "w1".into(),
            code: "HN".into(),
            name: "Ha Noi".into(),
            active: true,
            latitude: Some(21.0),
            longitude: None,
        };
        assert!(w.coordinates().is_none());
        w.longitude = Some(105.8);
        assert_eq!(w.coordinates(), Some((21.0, 105.8)));
    }
}
