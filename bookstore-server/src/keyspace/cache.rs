use super::{Keyspace, KeyspaceError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// JSON read-through cache over a [`Keyspace`].
///
/// Every call is bounded by the keyspace timeout. Failures are logged and
/// read as a miss; the store stays the source of truth.
#[derive(Clone)]
pub struct JsonCache {
    ks: Arc<dyn Keyspace>,
    timeout: Duration,
}

impl JsonCache {
    pub fn new(ks: Arc<dyn Keyspace>, timeout: Duration) -> Self {
        Self { ks, timeout }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match tokio::time::timeout(self.timeout, self.ks.get(key)).await {
            Ok(Ok(raw)) => raw?,
            Ok(Err(e)) => {
                tracing::warn!(key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
            Err(_) => {
                tracing::warn!(key, error = %KeyspaceError::Timeout, "Cache read timed out");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to encode cache entry");
                return;
            }
        };
        match tokio::time::timeout(self.timeout, self.ks.set(key, &raw, Some(ttl))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(key, error = %e, "Cache write failed"),
            Err(_) => tracing::warn!(key, "Cache write timed out"),
        }
    }

    pub async fn invalidate(&self, key: &str) {
        match tokio::time::timeout(self.timeout, self.ks.delete(key)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(key, error = %e, "Cache invalidation failed"),
            Err(_) => tracing::warn!(key, "Cache invalidation timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::{KsResult, MemoryKeyspace};
    use async_trait::async_trait;

    struct BrokenKeyspace;

    #[async_trait]
    impl Keyspace for BrokenKeyspace {
        async fn get(&self, _: &str) -> KsResult<Option<String>> {
            Err(KeyspaceError::Backend("down".into()))
        }
        async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> KsResult<()> {
            Err(KeyspaceError::Backend("down".into()))
        }
        async fn set_nx(&self, _: &str, _: &str, _: Option<Duration>) -> KsResult<bool> {
            Err(KeyspaceError::Backend("down".into()))
        }
        async fn delete(&self, _: &str) -> KsResult<bool> {
            Err(KeyspaceError::Backend("down".into()))
        }
        async fn compare_and_delete(&self, _: &str, _: &str) -> KsResult<bool> {
            Err(KeyspaceError::Backend("down".into()))
        }
        async fn incr(&self, _: &str) -> KsResult<i64> {
            Err(KeyspaceError::Backend("down".into()))
        }
        async fn ping(&self) -> KsResult<()> {
            Err(KeyspaceError::Backend("down".into()))
        }
    }

    #[tokio::test]
    async fn round_trips_json() {
        let cache = JsonCache::new(Arc::new(MemoryKeyspace::new()), Duration::from_secs(3));
        cache.set("k", &vec![1, 2, 3], Duration::from_secs(60)).await;
        assert_eq!(cache.get::<Vec<i32>>("k").await, Some(vec![1, 2, 3]));
        cache.invalidate("k").await;
        assert_eq!(cache.get::<Vec<i32>>("k").await, None);
    }

    #[tokio::test]
    async fn outage_is_a_miss() {
        let cache = JsonCache::new(Arc::new(BrokenKeyspace), Duration::from_secs(3));
        cache.set("k", &1, Duration::from_secs(60)).await;
        assert_eq!(cache.get::<i32>("k").await, None);
    }
}
