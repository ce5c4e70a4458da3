//! In-process [`ReplicaStore`] implementation.
//!
//! TTL'd map used by tests and by dev setups running without a replica
//! service. Expired entries are dropped lazily on access.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cv_domain::error::Result;
use parking_lot::Mutex;

use crate::replica::ReplicaStore;

struct Stored {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct MemoryReplica {
    entries: Mutex<HashMap<String, Stored>>,
}

impl MemoryReplica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|s| s.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReplicaStore for MemoryReplica {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(stored) if stored.expires_at > Instant::now() => {
                Ok(Some(stored.value.clone()))
            }
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.lock().insert(
            key.to_owned(),
            Stored {
                value: value.to_owned(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|(k, s)| k.starts_with(prefix) && s.expires_at > now)
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let replica = MemoryReplica::new();
        replica
            .put("a:v1:1", "one", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(replica.get("a:v1:1").await.unwrap().as_deref(), Some("one"));

        replica.delete("a:v1:1").await.unwrap();
        assert_eq!(replica.get("a:v1:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_are_gone() {
        let replica = MemoryReplica::new();
        replica
            .put("k", "v", Duration::from_millis(0))
            .await
            .unwrap();
        assert_eq!(replica.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn scan_filters_by_prefix() {
        let replica = MemoryReplica::new();
        let ttl = Duration::from_secs(60);
        replica.put("conv_backup:v1:1", "a", ttl).await.unwrap();
        replica.put("conv_backup:v1:2", "b", ttl).await.unwrap();
        replica.put("conv_ctx:v1:1:6:12", "c", ttl).await.unwrap();

        let mut keys = replica.scan("conv_backup:v1:").await.unwrap();
        keys.sort();
        assert_eq!(keys, ["conv_backup:v1:1", "conv_backup:v1:2"]);
    }
}
