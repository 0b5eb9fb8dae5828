use super::{Keyspace, KeyspaceError, KsResult};
use async_trait::async_trait;
use shared::util::now_millis;
use sqlx::SqlitePool;
use std::time::Duration;

/// Keyspace on the `kv_store` table, visible to every process that opens
/// the same database file. Expired rows are ignored on read and replaced on
/// write.
#[derive(Debug, Clone)]
pub struct SqliteKeyspace {
    pool: SqlitePool,
}

impl SqliteKeyspace {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Drop expired rows
    pub async fn purge_expired(&self) -> KsResult<u64> {
        let rows = sqlx::query("DELETE FROM kv_store WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now_millis())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows)
    }
}

fn expiry(now: i64, ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|t| now + t.as_millis() as i64)
}

#[async_trait]
impl Keyspace for SqliteKeyspace {
    async fn get(&self, key: &str) -> KsResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT value FROM kv_store WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(v,)| v))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KsResult<()> {
        let now = now_millis();
        sqlx::query(
            "INSERT INTO kv_store (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (key) DO UPDATE SET value = ?2, expires_at = ?3",
        )
        .bind(key)
        .bind(value)
        .bind(expiry(now, ttl))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> KsResult<bool> {
        let now = now_millis();
        let rows = sqlx::query(
            "INSERT INTO kv_store (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (key) DO UPDATE SET value = ?2, expires_at = ?3
             WHERE kv_store.expires_at IS NOT NULL AND kv_store.expires_at <= ?4",
        )
        .bind(key)
        .bind(value)
        .bind(expiry(now, ttl))
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows == 1)
    }

    async fn delete(&self, key: &str) -> KsResult<bool> {
        let rows = sqlx::query("DELETE FROM kv_store WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)")
            .bind(key)
            .bind(now_millis())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows == 1)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> KsResult<bool> {
        let rows = sqlx::query(
            "DELETE FROM kv_store WHERE key = ? AND value = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(expected)
        .bind(now_millis())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows == 1)
    }

    async fn incr(&self, key: &str) -> KsResult<i64> {
        let now = now_millis();
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let current: Option<(String, Option<i64>)> =
            sqlx::query_as("SELECT value, expires_at FROM kv_store WHERE key = ?")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;

        let base = match current {
            Some((value, expires_at)) if expires_at.is_none_or(|at| at > now) => value
                .parse::<i64>()
                .map_err(|_| KeyspaceError::NotInteger(key.to_string()))?,
            _ => 0,
        };
        let next = base + 1;

        sqlx::query(
            "INSERT INTO kv_store (key, value, expires_at) VALUES (?1, ?2, NULL)
             ON CONFLICT (key) DO UPDATE SET value = ?2",
        )
        .bind(key)
        .bind(next.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(next)
    }

    async fn ping(&self) -> KsResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
