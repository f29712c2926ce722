use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheStore, StoreResult};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |exp| now < exp)
    }
}

/// In-memory cache; clones share the same underlying map
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    data: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.data
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove `key` only if it is still expired under the write lock,
    /// so an entry stored after the read is kept
    async fn evict_if_expired(&self, key: &str) -> bool {
        let mut data = self.data.write().await;
        if data.get(key).is_some_and(|e| !e.is_live(Instant::now())) {
            data.remove(key);
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        let data = self.data.read().await;
        match data.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => Ok(Some(entry.value.clone())),
            Some(_) => {
                drop(data);
                self.evict_if_expired(key).await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.data
            .write()
            .await
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn forget(&self, key: &str) -> StoreResult<bool> {
        Ok(self.data.write().await.remove(key).is_some())
    }
}
