use super::{Keyspace, KsResult};
use std::sync::Arc;
use std::time::Duration;

/// Lease used when the caller has no better estimate; also the upper bound
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// `SETNX`-based lock with fencing tokens
#[derive(Clone)]
pub struct DistributedLock {
    ks: Arc<dyn Keyspace>,
}

/// Proof of holding a lock. The fencing token grows with every acquisition
/// of the same name, so a stale holder can be told apart downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGuard {
    pub name: String,
    pub fencing_token: i64,
    key: String,
    value: String,
}

impl DistributedLock {
    pub fn new(ks: Arc<dyn Keyspace>) -> Self {
        Self { ks }
    }

    /// Try once. `None` if someone else holds the lock.
    pub async fn try_acquire(&self, name: &str, lease: Duration) -> KsResult<Option<LockGuard>> {
        let lease = lease.min(DEFAULT_LEASE);
        let fencing_token = self.ks.incr(&format!("lock_fence:{name}")).await?;
        let key = format!("lock:{name}");
        let value = format!("{fencing_token}:{}", shared::util::new_id());

        if self.ks.set_nx(&key, &value, Some(lease)).await? {
            tracing::debug!(lock = name, fencing_token, "Lock acquired");
            Ok(Some(LockGuard {
                name: name.to_string(),
                fencing_token,
                key,
                value,
            }))
        } else {
            Ok(None)
        }
    }

    /// Release if still held by `guard`. Returns false if the lease had
    /// already expired or been taken over.
    pub async fn release(&self, guard: LockGuard) -> KsResult<bool> {
        let released = self.ks.compare_and_delete(&guard.key, &guard.value).await?;
        if !released {
            tracing::warn!(lock = %guard.name, fencing_token = guard.fencing_token, "Lock lost before release");
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::MemoryKeyspace;

    #[tokio::test(start_paused = true)]
    async fn exclusive_until_released_or_expired() {
        let lock = DistributedLock::new(Arc::new(MemoryKeyspace::new()));

        let first = lock.try_acquire("sweep", DEFAULT_LEASE).await.unwrap().unwrap();
        assert!(lock.try_acquire("sweep", DEFAULT_LEASE).await.unwrap().is_none());
        assert!(lock.release(first.clone()).await.unwrap());

        let second = lock.try_acquire("sweep", Duration::from_secs(5)).await.unwrap().unwrap();
        assert!(second.fencing_token > first.fencing_token);

        tokio::time::advance(Duration::from_secs(6)).await;
        let third = lock.try_acquire("sweep", DEFAULT_LEASE).await.unwrap().unwrap();
        // the expired holder cannot release the new owner's lock
        assert!(!lock.release(second).await.unwrap());
        assert!(lock.release(third).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn lease_is_capped() {
        let lock = DistributedLock::new(Arc::new(MemoryKeyspace::new()));
        lock.try_acquire("long", Duration::from_secs(600)).await.unwrap().unwrap();
        tokio::time::advance(DEFAULT_LEASE + Duration::from_secs(1)).await;
        assert!(lock.try_acquire("long", DEFAULT_LEASE).await.unwrap().is_some());
    }
}
