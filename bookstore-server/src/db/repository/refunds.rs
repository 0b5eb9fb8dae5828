//! Refund Repository

use super::{RepoResult, bad_enum, parse_decimal};
use shared::models::{Refund, RefundStatus};
use sqlx::{SqliteConnection, SqlitePool};

#[derive(sqlx::FromRow)]
struct RefundRow {
    id: String,
    payment_id: String,
    order_id: String,
    amount: String,
    status: String,
    reason: Option<String>,
    requested_by: String,
    decided_by: Option<String>,
    gateway_ref: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl RefundRow {
    fn into_model(self) -> RepoResult<Refund> {
        let status =
            RefundStatus::from_db(&self.status).ok_or_else(|| bad_enum("refunds.status", &self.status))?;
        Ok(Refund {
            amount: parse_decimal(&self.amount, "refunds.amount")?,
            id: self.id,
            payment_id: self.payment_id,
            order_id: self.order_id,
            status,
            reason: self.reason,
            requested_by: self.requested_by,
            decided_by: self.decided_by,
            gateway_ref: self.gateway_ref,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const COLUMNS: &str = "id, payment_id, order_id, amount, status, reason, requested_by, decided_by, \
                       gateway_ref, created_at, updated_at";

pub async fn insert(conn: &mut SqliteConnection, r: &Refund) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO refunds (id, payment_id, order_id, amount, status, reason, requested_by, decided_by,
                              gateway_ref, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&r.id)
    .bind(&r.payment_id)
    .bind(&r.order_id)
    .bind(r.amount.to_string())
    .bind(r.status.as_db())
    .bind(&r.reason)
    .bind(&r.requested_by)
    .bind(&r.decided_by)
    .bind(&r.gateway_ref)
    .bind(r.created_at)
    .bind(r.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn find_by_id(conn: &mut SqliteConnection, id: &str) -> RepoResult<Option<Refund>> {
    let row = sqlx::query_as::<_, RefundRow>(&format!("SELECT {COLUMNS} FROM refunds WHERE id = ?"))
        .bind(id)
        .fetch_optional(conn)
        .await?;
    row.map(RefundRow::into_model).transpose()
}

pub async fn get(pool: &SqlitePool, id: &str) -> RepoResult<Option<Refund>> {
    let mut conn = pool.acquire().await?;
    find_by_id(&mut conn, id).await
}

/// Refunds of a payment that are not rejected or failed
pub async fn find_active_for_payment(
    conn: &mut SqliteConnection,
    payment_id: &str,
) -> RepoResult<Vec<Refund>> {
    let rows = sqlx::query_as::<_, RefundRow>(&format!(
        "SELECT {COLUMNS} FROM refunds
         WHERE payment_id = ? AND status IN ('requested', 'approved', 'succeeded')
         ORDER BY created_at"
    ))
    .bind(payment_id)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(RefundRow::into_model).collect()
}

/// Guarded transition. Returns false if the refund was no longer in `from`.
pub async fn transition(
    conn: &mut SqliteConnection,
    id: &str,
    from: RefundStatus,
    to: RefundStatus,
    decided_by: Option<&str>,
    gateway_ref: Option<&str>,
    now: i64,
) -> RepoResult<bool> {
    let rows = sqlx::query(
        "UPDATE refunds
         SET status = ?, decided_by = COALESCE(?, decided_by), gateway_ref = COALESCE(?, gateway_ref),
             updated_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(to.as_db())
    .bind(decided_by)
    .bind(gateway_ref)
    .bind(now)
    .bind(id)
    .bind(from.as_db())
    .execute(conn)
    .await?
    .rows_affected();
    Ok(rows == 1)
}
