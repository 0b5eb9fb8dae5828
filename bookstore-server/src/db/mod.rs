//! Database Module
//!
//! Handles the SQLite connection pool, migrations and write transactions.

pub mod repository;

use repository::{RepoError, RepoResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

/// Attempts for a write transaction that keeps hitting `SQLITE_BUSY`
pub const MAX_TX_ATTEMPTS: u32 = 3;

/// Database service: owns a SQLite connection pool
#[derive(Clone)]
pub struct DbService {
    pub pool: SqlitePool,
}

impl DbService {
    /// Open (or create) the database file with WAL mode and apply migrations
    pub async fn new(database_url: &str) -> RepoResult<Self> {
        let url = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite:{database_url}")
        };

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| RepoError::Database(format!("Invalid database path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            // wait up to 5s on write conflicts instead of failing immediately
            .busy_timeout(Duration::from_millis(5000));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        tracing::info!("Database connection established (SQLite WAL, busy_timeout=5000ms)");

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database with the real schema.
    ///
    /// Every connection of an in-memory SQLite pool is a separate database,
    /// so the pool is pinned to a single connection that never expires.
    pub async fn in_memory() -> RepoResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| RepoError::Database(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> RepoResult<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| RepoError::Database(format!("Failed to apply migrations: {e}")))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// Cheap liveness probe
    pub async fn ping(&self) -> RepoResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Open a serialisable write transaction (`BEGIN IMMEDIATE` takes the
/// write lock up front, so no other writer can interleave).
pub async fn begin_immediate(pool: &SqlitePool) -> RepoResult<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

/// Errors that may be retried as-is when the database is momentarily locked
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for RepoError {
    fn is_transient(&self) -> bool {
        matches!(self, RepoError::Busy(_))
    }
}

/// Run a whole transaction body, retrying immediately on lock contention
/// (at most [`MAX_TX_ATTEMPTS`] attempts).
pub async fn with_retry<T, E, F, Fut>(label: &str, mut body: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match body().await {
            Err(e) if e.is_transient() && attempt < MAX_TX_ATTEMPTS => {
                tracing::warn!(op = label, attempt, error = %e, "Transaction contention, retrying");
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn in_memory_runs_migrations() {
        let db = DbService::in_memory().await.unwrap();
        let (value,): (i64,) = sqlx::query_as("SELECT value FROM order_sequence WHERE id = 1")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(value, 0);
        db.ping().await.unwrap();
    }

    #[tokio::test]
    async fn file_database_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = DbService::new(path.to_str().unwrap()).await.unwrap();
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn with_retry_stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RepoError> = with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RepoError::Busy("locked".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_TX_ATTEMPTS);
    }

    #[tokio::test]
    async fn with_retry_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RepoError> = with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RepoError::NotFound("x".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
