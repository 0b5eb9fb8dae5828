//! Payment & Callback Repository

use super::{RepoResult, bad_enum, parse_decimal};
use shared::models::{Payment, PaymentMethod, PaymentStatus};
use sqlx::{SqliteConnection, SqlitePool};

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: String,
    order_id: String,
    method: String,
    amount: String,
    status: String,
    gateway_txn_ref: String,
    idempotency_key: String,
    redirect_url: Option<String>,
    gateway_transaction_no: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl PaymentRow {
    fn into_model(self) -> RepoResult<Payment> {
        let method =
            PaymentMethod::from_db(&self.method).ok_or_else(|| bad_enum("payments.method", &self.method))?;
        let status =
            PaymentStatus::from_db(&self.status).ok_or_else(|| bad_enum("payments.status", &self.status))?;
        Ok(Payment {
            amount: parse_decimal(&self.amount, "payments.amount")?,
            id: self.id,
            order_id: self.order_id,
            method,
            status,
            gateway_txn_ref: self.gateway_txn_ref,
            idempotency_key: self.idempotency_key,
            redirect_url: self.redirect_url,
            gateway_transaction_no: self.gateway_transaction_no,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const COLUMNS: &str = "id, order_id, method, amount, status, gateway_txn_ref, idempotency_key, \
                       redirect_url, gateway_transaction_no, created_at, updated_at";

pub async fn insert(conn: &mut SqliteConnection, p: &Payment) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO payments (id, order_id, method, amount, status, gateway_txn_ref, idempotency_key,
                               redirect_url, gateway_transaction_no, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&p.id)
    .bind(&p.order_id)
    .bind(p.method.as_db())
    .bind(p.amount.to_string())
    .bind(p.status.as_db())
    .bind(&p.gateway_txn_ref)
    .bind(&p.idempotency_key)
    .bind(&p.redirect_url)
    .bind(&p.gateway_transaction_no)
    .bind(p.created_at)
    .bind(p.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn find_by_id(conn: &mut SqliteConnection, id: &str) -> RepoResult<Option<Payment>> {
    let row = sqlx::query_as::<_, PaymentRow>(&format!("SELECT {COLUMNS} FROM payments WHERE id = ?"))
        .bind(id)
        .fetch_optional(conn)
        .await?;
    row.map(PaymentRow::into_model).transpose()
}

pub async fn get(pool: &SqlitePool, id: &str) -> RepoResult<Option<Payment>> {
    let mut conn = pool.acquire().await?;
    find_by_id(&mut conn, id).await
}

pub async fn find_by_txn_ref(conn: &mut SqliteConnection, txn_ref: &str) -> RepoResult<Option<Payment>> {
    let row = sqlx::query_as::<_, PaymentRow>(&format!(
        "SELECT {COLUMNS} FROM payments WHERE gateway_txn_ref = ?"
    ))
    .bind(txn_ref)
    .fetch_optional(conn)
    .await?;
    row.map(PaymentRow::into_model).transpose()
}

/// The open (`initiated` / `pending`) payment for an order and method
pub async fn find_open(
    conn: &mut SqliteConnection,
    order_id: &str,
    method: PaymentMethod,
) -> RepoResult<Option<Payment>> {
    let row = sqlx::query_as::<_, PaymentRow>(&format!(
        "SELECT {COLUMNS} FROM payments
         WHERE order_id = ? AND method = ? AND status IN ('initiated', 'pending')"
    ))
    .bind(order_id)
    .bind(method.as_db())
    .fetch_optional(conn)
    .await?;
    row.map(PaymentRow::into_model).transpose()
}

/// All payments of an order, newest first
pub async fn find_for_order(conn: &mut SqliteConnection, order_id: &str) -> RepoResult<Vec<Payment>> {
    let rows = sqlx::query_as::<_, PaymentRow>(&format!(
        "SELECT {COLUMNS} FROM payments WHERE order_id = ? ORDER BY created_at DESC, id"
    ))
    .bind(order_id)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(PaymentRow::into_model).collect()
}

/// Guarded status transition. Returns false if the payment was no longer
/// in `from`.
pub async fn transition(
    conn: &mut SqliteConnection,
    id: &str,
    from: PaymentStatus,
    to: PaymentStatus,
    gateway_transaction_no: Option<&str>,
    now: i64,
) -> RepoResult<bool> {
    let rows = sqlx::query(
        "UPDATE payments
         SET status = ?, gateway_transaction_no = COALESCE(?, gateway_transaction_no), updated_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(to.as_db())
    .bind(gateway_transaction_no)
    .bind(now)
    .bind(id)
    .bind(from.as_db())
    .execute(conn)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

// =============================================================================
// Gateway callbacks
// =============================================================================

/// Outcome recorded for every inbound gateway callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    Processed,
    InvalidSignature,
    AmountMismatch,
    UnknownPayment,
}

impl CallbackStatus {
    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::InvalidSignature => "invalid_signature",
            Self::AmountMismatch => "amount_mismatch",
            Self::UnknownPayment => "unknown_payment",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallbackRecord<'a> {
    pub gateway: &'a str,
    pub txn_ref: &'a str,
    pub status: CallbackStatus,
    pub outcome: Option<&'a str>,
    pub response_body: &'a str,
    pub raw_params: &'a str,
}

/// Stored response of the callback already processed for `(gateway, txn_ref)`
pub async fn processed_response(
    conn: &mut SqliteConnection,
    gateway: &str,
    txn_ref: &str,
) -> RepoResult<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT response_body FROM payment_callbacks
         WHERE gateway = ? AND txn_ref = ? AND status = 'processed'",
    )
    .bind(gateway)
    .bind(txn_ref)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(|(body,)| body))
}

pub async fn record_callback(
    conn: &mut SqliteConnection,
    record: &CallbackRecord<'_>,
    now: i64,
) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO payment_callbacks (gateway, txn_ref, status, outcome, response_body, raw_params, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.gateway)
    .bind(record.txn_ref)
    .bind(record.status.as_db())
    .bind(record.outcome)
    .bind(record.response_body)
    .bind(record.raw_params)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

/// Number of recorded callbacks with the given status (operator views, tests)
pub async fn count_callbacks(
    pool: &SqlitePool,
    gateway: &str,
    txn_ref: &str,
    status: CallbackStatus,
) -> RepoResult<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM payment_callbacks WHERE gateway = ? AND txn_ref = ? AND status = ?",
    )
    .bind(gateway)
    .bind(txn_ref)
    .bind(status.as_db())
    .fetch_one(pool)
    .await?;
    Ok(count)
}
