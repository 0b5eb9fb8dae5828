//! Fixtures shared by unit tests

use crate::db::DbService;
use crate::db::repository::{books, inventory, orders, users};
use rust_decimal::Decimal;
use shared::models::{Book, Order, OrderStatus, ShippingAddress, Warehouse};
use sqlx::SqlitePool;
use std::str::FromStr;

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub async fn memory_db() -> DbService {
    DbService::in_memory().await.unwrap()
}

pub async fn seed_book(pool: &SqlitePool, id: &str, price: &str) {
    books::upsert(
        pool,
        &Book {
            id: id.to_string(),
            title: format!("Book {id}"),
            price: dec(price),
            active: true,
            updated_at: 0,
        },
    )
    .await
    .unwrap();
}

pub async fn seed_warehouse(pool: &SqlitePool, id: &str, coords: Option<(f64, f64)>) {
    inventory::upsert_warehouse(
        pool,
        &Warehouse {
            id: id.to_string(),
            code: id.to_uppercase(),
            name: format!("Warehouse {id}"),
            active: true,
            latitude: coords.map(|c| c.0),
            longitude: coords.map(|c| c.1),
        },
    )
    .await
    .unwrap();
}

pub async fn seed_stock(pool: &SqlitePool, warehouse_id: &str, book_id: &str, quantity: i64) {
    let mut conn = pool.acquire().await.unwrap();
    inventory::set_quantity(&mut conn, warehouse_id, book_id, quantity, 0)
        .await
        .unwrap();
}

pub async fn seed_user(pool: &SqlitePool, id: &str) {
    users::insert(pool, id, &format!("{id}@example.test"), id, "customer")
        .await
        .unwrap();
}

/// `(quantity, reserved)` of a stock row
pub async fn level(pool: &SqlitePool, warehouse_id: &str, book_id: &str) -> (i64, i64) {
    sqlx::query_as("SELECT quantity, reserved FROM warehouse_inventory WHERE warehouse_id = ? AND book_id = ?")
        .bind(warehouse_id)
        .bind(book_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub fn address(coords: Option<(f64, f64)>) -> ShippingAddress {
    ShippingAddress {
        recipient: "Test Customer".into(),
        phone: None,
        line1: "1 Test Street".into(),
        city: "Hanoi".into(),
        country: "VN".into(),
        latitude: coords.map(|c| c.0),
        longitude: coords.map(|c| c.1),
    }
}

/// Order of user `u1` with a total of 10.00 and no lines
pub async fn seed_order(pool: &SqlitePool, id: &str, status: OrderStatus) -> Order {
    seed_order_with_total(pool, id, status, "10.00").await
}

pub async fn seed_order_with_total(pool: &SqlitePool, id: &str, status: OrderStatus, total: &str) -> Order {
    let order = Order {
        id: id.to_string(),
        order_number: format!("BK-{id}"),
        user_id: "u1".into(),
        status,
        subtotal: dec(total),
        discount: Decimal::ZERO,
        shipping_fee: Decimal::ZERO,
        total: dec(total),
        promotion_id: None,
        shipping_address: address(None),
        items: vec![],
        version: 1,
        created_at: 0,
        updated_at: 0,
    };
    let mut conn = pool.acquire().await.unwrap();
    orders::insert(&mut conn, &order).await.unwrap();
    order
}
