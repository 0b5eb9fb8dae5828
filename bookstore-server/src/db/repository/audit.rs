//! Audit Log Repository

use super::RepoResult;
use sqlx::{SqliteConnection, SqlitePool};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub actor: String,
    pub action: String,
    pub resource: String,
    pub details: Option<String>,
    pub created_at: i64,
}

/// Append an entry; joins the caller's transaction so the record commits
/// together with the change it describes.
pub async fn record(
    conn: &mut SqliteConnection,
    actor: &str,
    action: &str,
    resource: &str,
    details: Option<&serde_json::Value>,
    now: i64,
) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO audit_log (actor, action, resource, details, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(actor)
    .bind(action)
    .bind(resource)
    .bind(details.map(|d| d.to_string()))
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn for_resource(pool: &SqlitePool, resource: &str) -> RepoResult<Vec<AuditEntry>> {
    let rows = sqlx::query_as::<_, AuditEntry>(
        "SELECT id, actor, action, resource, details, created_at FROM audit_log
         WHERE resource = ? ORDER BY id",
    )
    .bind(resource)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
