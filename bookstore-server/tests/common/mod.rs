//! Fixtures for the integration tests
#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bookstore_server::config::Config;
use bookstore_server::context::RequestContext;
use bookstore_server::db::DbService;
use bookstore_server::db::repository::{books, inventory, users};
use bookstore_server::keyspace::{DistributedLock, JsonCache, MemoryKeyspace};
use bookstore_server::notify::{LogEmailSender, OutboxPublisher};
use bookstore_server::payments::gateway::GatewayAdapter;
use bookstore_server::payments::signer::Params;
use bookstore_server::state::AppState;
use bookstore_server::worker::HandlerDeps;
use rust_decimal::Decimal;
use shared::models::{Book, CheckoutRequest, Payment, PaymentMethod, ShippingAddress, Warehouse};
use sqlx::SqlitePool;

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn ctx() -> RequestContext {
    RequestContext::new("it", Duration::from_secs(30))
}

pub async fn memory_state() -> AppState {
    let db = DbService::in_memory().await.unwrap();
    AppState::new(Config::for_tests(), db, Arc::new(MemoryKeyspace::new()))
}

/// State over a database file, for tests that need real connection concurrency
pub async fn file_state(dir: &tempfile::TempDir) -> AppState {
    let path = dir.path().join("bookstore.db");
    let db = DbService::new(&path.to_string_lossy()).await.unwrap();
    AppState::new(Config::for_tests(), db, Arc::new(MemoryKeyspace::new()))
}

pub fn handler_deps(state: &AppState) -> HandlerDeps {
    HandlerDeps {
        pool: state.db.pool.clone(),
        jobs: state.jobs.clone(),
        engine: state.engine.clone(),
        payments: state.payments.clone(),
        cache: JsonCache::new(state.keyspace.clone(), Duration::from_secs(1)),
        lock: DistributedLock::new(state.keyspace.clone()),
        email: Arc::new(LogEmailSender),
        publisher: Arc::new(OutboxPublisher::new(state.db.pool.clone())),
        promotion_sweep_limit: 0,
        notification_user_rate_cap: 0,
        smtp_timeout: Duration::ZERO,
    }
    .tuned(&state.config)
}

/// Warehouse `w1` holding `quantity` of book `b1` priced 75000
pub async fn stock_b1(pool: &SqlitePool, quantity: i64) {
    books::upsert(
        pool,
        &Book {
            id: "b1".into(),
            title: "The Rust Book".into(),
            price: dec("75000"),
            active: true,
            updated_at: 0,
        },
    )
    .await
    .unwrap();
    inventory::upsert_warehouse(
        pool,
        &Warehouse {
            id: "w1".into(),
            code: "W1".into(),
            name: "Hanoi".into(),
            active: true,
            latitude: Some(21.0278),
            longitude: Some(105.8342),
        },
    )
    .await
    .unwrap();
    let mut conn = pool.acquire().await.unwrap();
    inventory::set_quantity(&mut conn, "w1", "b1", quantity, 0).await.unwrap();
}

pub async fn seed_user(pool: &SqlitePool, id: &str) {
    users::insert(pool, id, &format!("{id}@example.test"), id, "customer")
        .await
        .unwrap();
}

/// `(quantity, reserved)` of w1/b1
pub async fn level_b1(pool: &SqlitePool) -> (i64, i64) {
    sqlx::query_as("SELECT quantity, reserved FROM warehouse_inventory WHERE warehouse_id = 'w1' AND book_id = 'b1'")
        .fetch_one(pool)
        .await
        .unwrap()
}

pub fn checkout_request(method: PaymentMethod) -> CheckoutRequest {
    CheckoutRequest {
        shipping_address: ShippingAddress {
            recipient: "Nguyen Van A".into(),
            phone: Some("0900000000".into()),
            line1: "1 Trang Tien".into(),
            city: "Hanoi".into(),
            country: "VN".into(),
            latitude: Some(21.02),
            longitude: Some(105.85),
        },
        payment_method: method,
    }
}

/// A VNPay IPN for `payment`, signed with the configured secret
pub fn vnpay_callback(state: &AppState, payment: &Payment, code: &str) -> Params {
    let vnpay = state.payments.gateways().vnpay();
    let mut params: Params = [
        ("vnp_TxnRef", payment.gateway_txn_ref.clone()),
        ("vnp_Amount", vnpay.encode_amount(payment.amount)),
        ("vnp_ResponseCode", code.to_string()),
        ("vnp_TransactionStatus", code.to_string()),
        ("vnp_TransactionNo", "14012345".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    vnpay.sign_params(&mut params);
    params
}
