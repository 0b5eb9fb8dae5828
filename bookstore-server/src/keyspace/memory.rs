use super::{Keyspace, KeyspaceError, KsResult};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_string(),
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_live(&self) -> bool {
        self.expires_at.is_none_or(|at| at > Instant::now())
    }
}

/// In-process keyspace backed by a concurrent map
#[derive(Debug, Default)]
pub struct MemoryKeyspace {
    map: DashMap<String, Entry>,
}

impl MemoryKeyspace {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Keyspace for MemoryKeyspace {
    async fn get(&self, key: &str) -> KsResult<Option<String>> {
        Ok(self
            .map
            .get(key)
            .filter(|e| e.is_live())
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KsResult<()> {
        self.map.insert(key.to_string(), Entry::new(value, ttl));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> KsResult<bool> {
        match self.map.entry(key.to_string()) {
            MapEntry::Occupied(mut e) => {
                if e.get().is_live() {
                    return Ok(false);
                }
                e.insert(Entry::new(value, ttl));
                Ok(true)
            }
            MapEntry::Vacant(e) => {
                e.insert(Entry::new(value, ttl));
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> KsResult<bool> {
        Ok(self.map.remove(key).is_some_and(|(_, e)| e.is_live()))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> KsResult<bool> {
        Ok(self
            .map
            .remove_if(key, |_, e| e.is_live() && e.value == expected)
            .is_some())
    }

    async fn incr(&self, key: &str) -> KsResult<i64> {
        let mut entry = self
            .map
            .entry(key.to_string())
            .or_insert_with(|| Entry::new("0", None));
        if !entry.is_live() {
            *entry = Entry::new("0", None);
        }
        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| KeyspaceError::NotInteger(key.to_string()))?;
        let next = current + 1;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn ping(&self) -> KsResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn satisfies_contract() {
        super::super::contract::basic_ops(&MemoryKeyspace::new()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let ks = MemoryKeyspace::new();
        ks.set("k", "v", Some(Duration::from_secs(10))).await.unwrap();
        assert!(!ks.set_nx("k", "w", None).await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(ks.get("k").await.unwrap(), None);
        assert!(ks.set_nx("k", "w", None).await.unwrap());
        assert_eq!(ks.get("k").await.unwrap().as_deref(), Some("w"));
    }
}
