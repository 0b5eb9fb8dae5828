use super::{InventoryError, InventoryResult, ops};
use crate::db::repository::inventory as repo;
use crate::db::{begin_immediate, with_retry};
use shared::models::{Availability, NearestWarehouse, StockLevel};
use shared::util::now_millis;
use sqlx::SqlitePool;
use std::time::Duration;

/// Standalone entry points of the reservation engine, each in its own
/// `BEGIN IMMEDIATE` transaction
#[derive(Clone)]
pub struct ReservationEngine {
    pool: SqlitePool,
}

/// `now + ttl` in Unix millis, refusing holds that do not fit
fn expiry(now: i64, ttl: Duration) -> InventoryResult<i64> {
    i64::try_from(ttl.as_millis())
        .ok()
        .and_then(|ms| now.checked_add(ms))
        .ok_or(InventoryError::InvalidTtl(ttl))
}

impl ReservationEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn reserve(
        &self,
        order_id: &str,
        warehouse_id: &str,
        book_id: &str,
        qty: i64,
        ttl: Duration,
    ) -> InventoryResult<()> {
        with_retry("inventory.reserve", move || {
            self.reserve_once(order_id, warehouse_id, book_id, qty, ttl)
        })
        .await
    }

    async fn reserve_once(
        &self,
        order_id: &str,
        warehouse_id: &str,
        book_id: &str,
        qty: i64,
        ttl: Duration,
    ) -> InventoryResult<()> {
        let now = now_millis();
        let expires_at = expiry(now, ttl)?;
        let mut tx = begin_immediate(&self.pool).await?;
        ops::reserve(&mut tx, order_id, warehouse_id, book_id, qty, expires_at, now).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Returns the number of units released (0 when nothing was held)
    pub async fn release(&self, order_id: &str) -> InventoryResult<i64> {
        with_retry("inventory.release", move || async move {
            let mut tx = begin_immediate(&self.pool).await?;
            let units = ops::release(&mut tx, order_id, now_millis()).await?;
            tx.commit().await?;
            Ok(units)
        })
        .await
    }

    /// Returns the number of units sold (0 when nothing was held)
    pub async fn complete_sale(&self, order_id: &str) -> InventoryResult<i64> {
        with_retry("inventory.complete_sale", move || async move {
            let mut tx = begin_immediate(&self.pool).await?;
            let units = ops::complete_sale(&mut tx, order_id, now_millis()).await?;
            tx.commit().await?;
            Ok(units)
        })
        .await
    }

    pub async fn find_nearest_with_stock(
        &self,
        book_id: &str,
        destination: Option<(f64, f64)>,
        qty: i64,
    ) -> InventoryResult<Option<NearestWarehouse>> {
        let mut conn = self.pool.acquire().await?;
        ops::find_nearest_with_stock(&mut conn, book_id, destination, qty).await
    }

    /// Sum of available stock across active warehouses
    pub async fn check_availability(&self, book_id: &str, qty: i64) -> InventoryResult<Availability> {
        let warehouses = repo::stock_by_warehouse(&self.pool, book_id).await?;
        let total_available: i64 = warehouses.iter().map(|w| w.available).sum();
        Ok(Availability {
            book_id: book_id.to_string(),
            requested: qty,
            total_available,
            sufficient: total_available >= qty,
            warehouses,
        })
    }

    /// Add `delta` (may be negative) to the on-hand quantity. Refuses any
    /// result below zero or below what is currently reserved.
    pub async fn adjust_stock(
        &self,
        warehouse_id: &str,
        book_id: &str,
        delta: i64,
    ) -> InventoryResult<StockLevel> {
        if repo::find_warehouse(&self.pool, warehouse_id).await?.is_none() {
            return Err(InventoryError::WarehouseNotFound(warehouse_id.to_string()));
        }
        with_retry("inventory.adjust_stock", move || {
            self.adjust_once(warehouse_id, book_id, delta)
        })
        .await
    }

    async fn adjust_once(
        &self,
        warehouse_id: &str,
        book_id: &str,
        delta: i64,
    ) -> InventoryResult<StockLevel> {
        let now = now_millis();
        let mut tx = begin_immediate(&self.pool).await?;
        let current = repo::find_level(&mut tx, warehouse_id, book_id)
            .await?
            .map(|(level, _)| level)
            .unwrap_or(StockLevel {
                quantity: 0,
                reserved: 0,
            });

        let quantity = current.quantity + delta;
        if quantity < 0 || quantity < current.reserved {
            return Err(InventoryError::AdjustmentRejected {
                quantity,
                reserved: current.reserved,
            });
        }
        if repo::set_quantity(&mut tx, warehouse_id, book_id, quantity, now).await? == 0 {
            return Err(InventoryError::AdjustmentRejected {
                quantity,
                reserved: current.reserved,
            });
        }
        tx.commit().await?;

        tracing::info!(warehouse_id, book_id, delta, quantity, "Stock adjusted");
        Ok(StockLevel {
            quantity,
            reserved: current.reserved,
        })
    }

    pub async fn level(&self, warehouse_id: &str, book_id: &str) -> InventoryResult<Option<StockLevel>> {
        let mut conn = self.pool.acquire().await?;
        Ok(repo::find_level(&mut conn, warehouse_id, book_id)
            .await?
            .map(|(level, _)| level))
    }

    /// Orders whose reservations expired before `now`
    pub async fn expired_reservations(&self, now: i64, limit: i64) -> InventoryResult<Vec<String>> {
        Ok(repo::expired_reservation_orders(&self.pool, now, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    const TTL: Duration = Duration::from_secs(15 * 60);

    async fn setup(quantity: i64) -> (crate::db::DbService, ReservationEngine) {
        let db = memory_db().await;
        seed_book(&db.pool, "b1", "10.00").await;
        seed_warehouse(&db.pool, "w1", Some((10.0, 106.0))).await;
        seed_stock(&db.pool, "w1", "b1", quantity).await;
        let engine = ReservationEngine::new(db.pool.clone());
        (db, engine)
    }

    #[tokio::test]
    async fn reserve_exactly_available_then_one_more_fails() {
        let (db, engine) = setup(5).await;
        engine.reserve("o1", "w1", "b1", 5, TTL).await.unwrap();
        assert_eq!(level(&db.pool, "w1", "b1").await, (5, 5));

        let err = engine.reserve("o2", "w1", "b1", 1, TTL).await.unwrap_err();
        assert!(matches!(err, InventoryError::Insufficient { requested: 1, .. }));
        assert_eq!(level(&db.pool, "w1", "b1").await, (5, 5));
    }

    #[tokio::test]
    async fn oversized_ttl_is_refused_without_reserving() {
        let (db, engine) = setup(5).await;
        let err = engine
            .reserve("o1", "w1", "b1", 1, Duration::from_secs(u64::MAX))
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::InvalidTtl(_)));
        assert_eq!(level(&db.pool, "w1", "b1").await, (5, 0));
        assert_eq!(expiry(1_000, Duration::from_secs(1)).unwrap(), 2_000);
    }

    #[tokio::test]
    async fn reserve_then_release_restores_counters() {
        let (db, engine) = setup(5).await;
        engine.reserve("o1", "w1", "b1", 2, TTL).await.unwrap();
        assert_eq!(engine.release("o1").await.unwrap(), 2);
        assert_eq!(level(&db.pool, "w1", "b1").await, (5, 0));

        // second release is a no-op
        assert_eq!(engine.release("o1").await.unwrap(), 0);
        assert_eq!(level(&db.pool, "w1", "b1").await, (5, 0));
    }

    #[tokio::test]
    async fn complete_sale_decrements_quantity_once() {
        let (db, engine) = setup(5).await;
        engine.reserve("o1", "w1", "b1", 2, TTL).await.unwrap();
        assert_eq!(engine.complete_sale("o1").await.unwrap(), 2);
        assert_eq!(level(&db.pool, "w1", "b1").await, (3, 0));

        assert_eq!(engine.complete_sale("o1").await.unwrap(), 0);
        assert_eq!(level(&db.pool, "w1", "b1").await, (3, 0));
    }

    #[tokio::test]
    async fn second_reservation_for_same_order_line_is_rejected() {
        let (db, engine) = setup(5).await;
        engine.reserve("o1", "w1", "b1", 1, TTL).await.unwrap();
        let err = engine.reserve("o1", "w1", "b1", 1, TTL).await.unwrap_err();
        assert!(matches!(err, InventoryError::DuplicateReservation { .. }));
        assert_eq!(level(&db.pool, "w1", "b1").await, (5, 1));
    }

    #[tokio::test]
    async fn missing_row_or_inactive_warehouse_is_out_of_stock() {
        let (db, engine) = setup(5).await;
        let err = engine.reserve("o1", "w1", "missing", 1, TTL).await.unwrap_err();
        assert!(matches!(err, InventoryError::OutOfStock { .. }));

        sqlx::query("UPDATE warehouses SET active = 0 WHERE id = 'w1'")
            .execute(&db.pool)
            .await
            .unwrap();
        let err = engine.reserve("o1", "w1", "b1", 1, TTL).await.unwrap_err();
        assert!(matches!(err, InventoryError::OutOfStock { .. }));
    }

    #[tokio::test]
    async fn non_positive_quantity_is_rejected() {
        let (_db, engine) = setup(5).await;
        assert!(matches!(
            engine.reserve("o1", "w1", "b1", 0, TTL).await,
            Err(InventoryError::InvalidQuantity(0))
        ));
    }

    #[tokio::test]
    async fn nearest_prefers_distance_then_lowest_id() {
        let db = memory_db().await;
        seed_book(&db.pool, "b1", "10.00").await;
        // Ho Chi Minh City area
        seed_warehouse(&db.pool, "w-far", Some((21.0285, 105.8542))).await;
        seed_warehouse(&db.pool, "w-near-b", Some((10.80, 106.65))).await;
        seed_warehouse(&db.pool, "w-near-a", Some((10.80, 106.65))).await;
        seed_warehouse(&db.pool, "w-empty", Some((10.7769, 106.7009))).await;
        for w in ["w-far", "w-near-b", "w-near-a"] {
            seed_stock(&db.pool, w, "b1", 3).await;
        }
        seed_stock(&db.pool, "w-empty", "b1", 1).await;
        let engine = ReservationEngine::new(db.pool.clone());

        let found = engine
            .find_nearest_with_stock("b1", Some((10.7769, 106.7009)), 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.warehouse.id, "w-near-a");
        assert!(found.distance_km.unwrap() > 0.0);

        // without a destination every candidate is equally near
        let found = engine.find_nearest_with_stock("b1", None, 2).await.unwrap().unwrap();
        assert_eq!(found.warehouse.id, "w-far");

        assert!(engine.find_nearest_with_stock("b1", None, 4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn availability_sums_active_warehouses() {
        let (db, engine) = setup(5).await;
        seed_warehouse(&db.pool, "w2", None).await;
        seed_stock(&db.pool, "w2", "b1", 4).await;
        seed_warehouse(&db.pool, "w3", None).await;
        seed_stock(&db.pool, "w3", "b1", 100).await;
        sqlx::query("UPDATE warehouses SET active = 0 WHERE id = 'w3'")
            .execute(&db.pool)
            .await
            .unwrap();
        engine.reserve("o1", "w1", "b1", 2, TTL).await.unwrap();

        let a = engine.check_availability("b1", 8).await.unwrap();
        assert_eq!(a.total_available, 7);
        assert!(!a.sufficient);
        assert_eq!(a.warehouses.len(), 2);
    }

    #[tokio::test]
    async fn adjust_refuses_to_drop_below_reserved() {
        let (db, engine) = setup(5).await;
        engine.reserve("o1", "w1", "b1", 3, TTL).await.unwrap();

        let err = engine.adjust_stock("w1", "b1", -3).await.unwrap_err();
        assert!(matches!(err, InventoryError::AdjustmentRejected { quantity: 2, reserved: 3 }));

        let level_after = engine.adjust_stock("w1", "b1", -2).await.unwrap();
        assert_eq!(level_after, StockLevel { quantity: 3, reserved: 3 });
        assert_eq!(level(&db.pool, "w1", "b1").await, (3, 3));

        assert!(matches!(
            engine.adjust_stock("nope", "b1", 1).await,
            Err(InventoryError::WarehouseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn expired_reservations_are_listed() {
        let (_db, engine) = setup(5).await;
        engine.reserve("o1", "w1", "b1", 1, Duration::ZERO).await.unwrap();
        engine.reserve("o2", "w1", "b1", 1, TTL).await.unwrap();
        let expired = engine.expired_reservations(now_millis() + 1, 10).await.unwrap();
        assert_eq!(expired, vec!["o1".to_string()]);
    }
}
