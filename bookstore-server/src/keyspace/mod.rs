//! Shared keyspace
//!
//! Key/value store with TTLs, `SETNX` and atomic counters. Used for read
//! caching and short-lived distributed locks. Two backends:
//!
//! - [`MemoryKeyspace`]: per-process, for tests and single-process runs
//! - [`SqliteKeyspace`]: the `kv_store` table, shared by API and worker

mod cache;
mod lock;
mod memory;
mod sqlite;

pub use cache::JsonCache;
pub use lock::{DEFAULT_LEASE, DistributedLock, LockGuard};
pub use memory::MemoryKeyspace;
pub use sqlite::SqliteKeyspace;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyspaceError {
    #[error("Keyspace backend error: {0}")]
    Backend(String),

    #[error("Keyspace operation timed out")]
    Timeout,

    #[error("Value at {0} is not an integer")]
    NotInteger(String),
}

impl From<sqlx::Error> for KeyspaceError {
    fn from(err: sqlx::Error) -> Self {
        KeyspaceError::Backend(err.to_string())
    }
}

impl From<KeyspaceError> for shared::AppError {
    fn from(err: KeyspaceError) -> Self {
        tracing::warn!(error = %err, "Keyspace unavailable");
        match err {
            KeyspaceError::Timeout => shared::AppError::timeout(),
            _ => shared::AppError::unavailable("Cache unavailable"),
        }
    }
}

pub type KsResult<T> = Result<T, KeyspaceError>;

#[async_trait]
pub trait Keyspace: Send + Sync {
    async fn get(&self, key: &str) -> KsResult<Option<String>>;

    /// Set unconditionally. `ttl = None` keeps the key until deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KsResult<()>;

    /// Set only if the key is absent (or expired). Returns whether it was set.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> KsResult<bool>;

    async fn delete(&self, key: &str) -> KsResult<bool>;

    /// Delete only if the current value equals `expected`
    async fn compare_and_delete(&self, key: &str, expected: &str) -> KsResult<bool>;

    /// Atomically increment an integer value, starting from 0
    async fn incr(&self, key: &str) -> KsResult<i64>;

    async fn ping(&self) -> KsResult<()>;
}

/// How long a cached availability snapshot is served
pub const STOCK_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Cache key for a book's aggregate stock
pub fn book_stock_key(book_id: &str) -> String {
    format!("book_stock:{book_id}")
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every backend must share

    use super::*;

    pub async fn basic_ops(ks: &dyn Keyspace) {
        assert_eq!(ks.get("a").await.unwrap(), None);
        ks.set("a", "1", None).await.unwrap();
        assert_eq!(ks.get("a").await.unwrap().as_deref(), Some("1"));

        assert!(!ks.set_nx("a", "2", None).await.unwrap());
        assert!(ks.set_nx("b", "2", None).await.unwrap());
        assert_eq!(ks.get("b").await.unwrap().as_deref(), Some("2"));

        assert!(!ks.compare_and_delete("b", "other").await.unwrap());
        assert!(ks.compare_and_delete("b", "2").await.unwrap());
        assert_eq!(ks.get("b").await.unwrap(), None);

        assert!(ks.delete("a").await.unwrap());
        assert!(!ks.delete("a").await.unwrap());

        assert_eq!(ks.incr("n").await.unwrap(), 1);
        assert_eq!(ks.incr("n").await.unwrap(), 2);
        ks.set("s", "abc", None).await.unwrap();
        assert!(matches!(ks.incr("s").await, Err(KeyspaceError::NotInteger(_))));

        ks.ping().await.unwrap();
    }
}
