//! Warehouse & Inventory Repository
//!
//! Every counter mutation is a single guarded `UPDATE`; the affected-row
//! count tells the caller whether the guard held.

use super::RepoResult;
use shared::models::{Reservation, StockLevel, Warehouse, WarehouseStock};
use sqlx::{SqliteConnection, SqlitePool};

#[derive(sqlx::FromRow)]
struct WarehouseRow {
    id: String,
    code: String,
    name: String,
    active: bool,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl WarehouseRow {
    fn into_model(self) -> Warehouse {
        Warehouse {
            id: self.id,
            code: self.code,
            name: self.name,
            active: self.active,
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CandidateRow {
    id: String,
    code: String,
    name: String,
    active: bool,
    latitude: Option<f64>,
    longitude: Option<f64>,
    available: i64,
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    order_id: String,
    warehouse_id: String,
    book_id: String,
    quantity: i64,
    expires_at: i64,
    created_at: i64,
}

impl ReservationRow {
    fn into_model(self) -> Reservation {
        Reservation {
            order_id: self.order_id,
            warehouse_id: self.warehouse_id,
            book_id: self.book_id,
            quantity: self.quantity,
            expires_at: self.expires_at,
            created_at: self.created_at,
        }
    }
}

// =============================================================================
// Warehouses
// =============================================================================

pub async fn find_warehouse(pool: &SqlitePool, id: &str) -> RepoResult<Option<Warehouse>> {
    let row = sqlx::query_as::<_, WarehouseRow>(
        "SELECT id, code, name, active, latitude, longitude FROM warehouses WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(WarehouseRow::into_model))
}

/// Insert or replace a warehouse (used by seeding and tests)
pub async fn upsert_warehouse(pool: &SqlitePool, w: &Warehouse) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO warehouses (id, code, name, active, latitude, longitude, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (id) DO UPDATE SET code = ?2, name = ?3, active = ?4, latitude = ?5, longitude = ?6",
    )
    .bind(&w.id)
    .bind(&w.code)
    .bind(&w.name)
    .bind(w.active)
    .bind(w.latitude)
    .bind(w.longitude)
    .bind(shared::util::now_millis())
    .execute(pool)
    .await?;
    Ok(())
}

/// Active warehouses holding at least `min_available` of a book
pub async fn candidates(
    conn: &mut SqliteConnection,
    book_id: &str,
    min_available: i64,
) -> RepoResult<Vec<(Warehouse, i64)>> {
    let rows = sqlx::query_as::<_, CandidateRow>(
        "SELECT w.id, w.code, w.name, w.active, w.latitude, w.longitude,
                (i.quantity - i.reserved) AS available
         FROM warehouse_inventory i
         JOIN warehouses w ON w.id = i.warehouse_id
         WHERE i.book_id = ? AND w.active = 1 AND (i.quantity - i.reserved) >= ?
         ORDER BY w.id",
    )
    .bind(book_id)
    .bind(min_available)
    .fetch_all(conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| {
            let available = r.available;
            (
                Warehouse {
                    id: r.id,
                    code: r.code,
                    name: r.name,
                    active: r.active,
                    latitude: r.latitude,
                    longitude: r.longitude,
                },
                available,
            )
        })
        .collect())
}

/// Per-warehouse availability of a book across active warehouses
pub async fn stock_by_warehouse(pool: &SqlitePool, book_id: &str) -> RepoResult<Vec<WarehouseStock>> {
    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT w.id, w.code, (i.quantity - i.reserved)
         FROM warehouse_inventory i
         JOIN warehouses w ON w.id = i.warehouse_id
         WHERE i.book_id = ? AND w.active = 1
         ORDER BY w.id",
    )
    .bind(book_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(warehouse_id, warehouse_code, available)| WarehouseStock {
            warehouse_id,
            warehouse_code,
            available,
        })
        .collect())
}

// =============================================================================
// Counters
// =============================================================================

/// Current counters plus whether the warehouse is active
pub async fn find_level(
    conn: &mut SqliteConnection,
    warehouse_id: &str,
    book_id: &str,
) -> RepoResult<Option<(StockLevel, bool)>> {
    let row: Option<(i64, i64, bool)> = sqlx::query_as(
        "SELECT i.quantity, i.reserved, w.active
         FROM warehouse_inventory i
         JOIN warehouses w ON w.id = i.warehouse_id
         WHERE i.warehouse_id = ? AND i.book_id = ?",
    )
    .bind(warehouse_id)
    .bind(book_id)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(|(quantity, reserved, active)| (StockLevel { quantity, reserved }, active)))
}

/// `reserved += qty` if `available >= qty`. Returns affected rows (0 or 1).
pub async fn try_reserve(
    conn: &mut SqliteConnection,
    warehouse_id: &str,
    book_id: &str,
    qty: i64,
    now: i64,
) -> RepoResult<u64> {
    let rows = sqlx::query(
        "UPDATE warehouse_inventory SET reserved = reserved + ?1, updated_at = ?2
         WHERE warehouse_id = ?3 AND book_id = ?4 AND quantity - reserved >= ?1",
    )
    .bind(qty)
    .bind(now)
    .bind(warehouse_id)
    .bind(book_id)
    .execute(conn)
    .await?
    .rows_affected();
    Ok(rows)
}

/// `reserved -= qty` if at least `qty` is reserved
pub async fn release_reserved(
    conn: &mut SqliteConnection,
    warehouse_id: &str,
    book_id: &str,
    qty: i64,
    now: i64,
) -> RepoResult<u64> {
    let rows = sqlx::query(
        "UPDATE warehouse_inventory SET reserved = reserved - ?1, updated_at = ?2
         WHERE warehouse_id = ?3 AND book_id = ?4 AND reserved >= ?1",
    )
    .bind(qty)
    .bind(now)
    .bind(warehouse_id)
    .bind(book_id)
    .execute(conn)
    .await?
    .rows_affected();
    Ok(rows)
}

/// `quantity -= qty; reserved -= qty` if both cover `qty`
pub async fn consume_reserved(
    conn: &mut SqliteConnection,
    warehouse_id: &str,
    book_id: &str,
    qty: i64,
    now: i64,
) -> RepoResult<u64> {
    let rows = sqlx::query(
        "UPDATE warehouse_inventory
         SET quantity = quantity - ?1, reserved = reserved - ?1, updated_at = ?2
         WHERE warehouse_id = ?3 AND book_id = ?4 AND reserved >= ?1 AND quantity >= ?1",
    )
    .bind(qty)
    .bind(now)
    .bind(warehouse_id)
    .bind(book_id)
    .execute(conn)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Set the on-hand quantity if it stays `>= reserved`. Creates the row when
/// missing. Returns affected rows.
pub async fn set_quantity(
    conn: &mut SqliteConnection,
    warehouse_id: &str,
    book_id: &str,
    quantity: i64,
    now: i64,
) -> RepoResult<u64> {
    let rows = sqlx::query(
        "INSERT INTO warehouse_inventory (warehouse_id, book_id, quantity, reserved, updated_at)
         VALUES (?1, ?2, ?3, 0, ?4)
         ON CONFLICT (warehouse_id, book_id) DO UPDATE SET quantity = ?3, updated_at = ?4
         WHERE reserved <= ?3",
    )
    .bind(warehouse_id)
    .bind(book_id)
    .bind(quantity)
    .bind(now)
    .execute(conn)
    .await?
    .rows_affected();
    Ok(rows)
}

// =============================================================================
// Reservation records
// =============================================================================

pub async fn reservation_exists(
    conn: &mut SqliteConnection,
    order_id: &str,
    book_id: &str,
) -> RepoResult<bool> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM reservations WHERE order_id = ? AND book_id = ?")
            .bind(order_id)
            .bind(book_id)
            .fetch_optional(conn)
            .await?;
    Ok(row.is_some())
}

pub async fn insert_reservation(conn: &mut SqliteConnection, r: &Reservation) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO reservations (order_id, warehouse_id, book_id, quantity, expires_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&r.order_id)
    .bind(&r.warehouse_id)
    .bind(&r.book_id)
    .bind(r.quantity)
    .bind(r.expires_at)
    .bind(r.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn reservations_for_order(
    conn: &mut SqliteConnection,
    order_id: &str,
) -> RepoResult<Vec<Reservation>> {
    let rows = sqlx::query_as::<_, ReservationRow>(
        "SELECT order_id, warehouse_id, book_id, quantity, expires_at, created_at
         FROM reservations WHERE order_id = ? ORDER BY book_id",
    )
    .bind(order_id)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(ReservationRow::into_model).collect())
}

pub async fn delete_reservations(conn: &mut SqliteConnection, order_id: &str) -> RepoResult<u64> {
    let rows = sqlx::query("DELETE FROM reservations WHERE order_id = ?")
        .bind(order_id)
        .execute(conn)
        .await?
        .rows_affected();
    Ok(rows)
}

/// Orders holding at least one reservation that expired before `now`.
///
/// Orders past `pending` keep their stock until shipment (cash on delivery)
/// and are skipped; reservations made for ids without an order row are
/// included.
pub async fn expired_reservation_orders(
    pool: &SqlitePool,
    now: i64,
    limit: i64,
) -> RepoResult<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT r.order_id FROM reservations r
         LEFT JOIN orders o ON o.id = r.order_id
         WHERE o.id IS NULL OR o.status = 'pending'
         GROUP BY r.order_id
         HAVING MIN(r.expires_at) <= ?
         ORDER BY MIN(r.expires_at)
         LIMIT ?",
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

