//! In-transaction reservation primitives
//!
//! Every function takes the caller's connection so it commits or rolls back
//! with the surrounding transaction. Counter changes are single guarded
//! statements; the affected-row count decides the outcome.

use super::{InventoryError, InventoryResult};
use crate::db::repository::inventory as repo;
use crate::invariants;
use shared::models::{NearestWarehouse, Reservation};
use sqlx::SqliteConnection;
use std::cmp::Ordering;

use super::geo::haversine_km;

/// Reserve `qty` of a book in a warehouse for an order line
pub async fn reserve(
    conn: &mut SqliteConnection,
    order_id: &str,
    warehouse_id: &str,
    book_id: &str,
    qty: i64,
    expires_at: i64,
    now: i64,
) -> InventoryResult<()> {
    if qty <= 0 {
        return Err(InventoryError::InvalidQuantity(qty));
    }
    if repo::reservation_exists(conn, order_id, book_id).await? {
        return Err(InventoryError::DuplicateReservation {
            order_id: order_id.to_string(),
            book_id: book_id.to_string(),
        });
    }

    match repo::find_level(conn, warehouse_id, book_id).await? {
        Some((_, true)) => {}
        _ => {
            return Err(InventoryError::OutOfStock {
                warehouse_id: warehouse_id.to_string(),
                book_id: book_id.to_string(),
            });
        }
    }

    if repo::try_reserve(conn, warehouse_id, book_id, qty, now).await? == 0 {
        return Err(InventoryError::Insufficient {
            warehouse_id: warehouse_id.to_string(),
            book_id: book_id.to_string(),
            requested: qty,
        });
    }

    repo::insert_reservation(
        conn,
        &Reservation {
            order_id: order_id.to_string(),
            warehouse_id: warehouse_id.to_string(),
            book_id: book_id.to_string(),
            quantity: qty,
            expires_at,
            created_at: now,
        },
    )
    .await?;

    tracing::debug!(order_id, warehouse_id, book_id, qty, "Stock reserved");
    Ok(())
}

/// Return every unit reserved by an order to `available`. No-op when the
/// order holds nothing. Returns the number of units released.
pub async fn release(conn: &mut SqliteConnection, order_id: &str, now: i64) -> InventoryResult<i64> {
    let reservations = repo::reservations_for_order(conn, order_id).await?;
    let mut units = 0;
    for r in &reservations {
        if repo::release_reserved(conn, &r.warehouse_id, &r.book_id, r.quantity, now).await? == 0 {
            let detail = format!(
                "release of {} x {} in {} for order {} exceeds the reserved counter",
                r.quantity, r.book_id, r.warehouse_id, order_id
            );
            invariants::report("orphan_reservation", &detail);
            return Err(InventoryError::InvariantViolation(detail));
        }
        units += r.quantity;
    }
    if !reservations.is_empty() {
        repo::delete_reservations(conn, order_id).await?;
        tracing::debug!(order_id, units, "Reservations released");
    }
    Ok(units)
}

/// Turn an order's reservations into permanent stock decrements. No-op when
/// the order holds nothing. Returns the number of units sold.
pub async fn complete_sale(
    conn: &mut SqliteConnection,
    order_id: &str,
    now: i64,
) -> InventoryResult<i64> {
    let reservations = repo::reservations_for_order(conn, order_id).await?;
    let mut units = 0;
    for r in &reservations {
        if repo::consume_reserved(conn, &r.warehouse_id, &r.book_id, r.quantity, now).await? == 0 {
            let detail = format!(
                "sale of {} x {} in {} for order {} exceeds the reserved counter",
                r.quantity, r.book_id, r.warehouse_id, order_id
            );
            invariants::report("orphan_reservation", &detail);
            return Err(InventoryError::InvariantViolation(detail));
        }
        units += r.quantity;
    }
    if !reservations.is_empty() {
        repo::delete_reservations(conn, order_id).await?;
        tracing::debug!(order_id, units, "Sale completed");
    }
    Ok(units)
}

/// Nearest active warehouse holding at least `qty` of a book.
///
/// Warehouses with coordinates rank by great-circle distance from
/// `destination`; those without coordinates (or every candidate, when the
/// destination has none) rank after them at equal distance. Ties go to the
/// lowest warehouse id.
pub async fn find_nearest_with_stock(
    conn: &mut SqliteConnection,
    book_id: &str,
    destination: Option<(f64, f64)>,
    qty: i64,
) -> InventoryResult<Option<NearestWarehouse>> {
    if qty <= 0 {
        return Err(InventoryError::InvalidQuantity(qty));
    }
    let candidates = repo::candidates(conn, book_id, qty).await?;

    let nearest = candidates
        .into_iter()
        .map(|(warehouse, available)| {
            let distance_km = destination
                .zip(warehouse.coordinates())
                .map(|(to, from)| haversine_km(from, to));
            NearestWarehouse {
                warehouse,
                available,
                distance_km,
            }
        })
        .min_by(compare_candidates);

    Ok(nearest)
}

fn compare_candidates(a: &NearestWarehouse, b: &NearestWarehouse) -> Ordering {
    let by_distance = match (a.distance_km, b.distance_km) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_distance.then_with(|| a.warehouse.id.cmp(&b.warehouse.id))
}
