//! Cache storage backends

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

/// A stored result
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(value: Value, ttl: Duration) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

/// Key/value store the interceptor writes through. Implementations must not
/// return expired entries.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<CacheEntry>;

    async fn set(&self, key: String, entry: CacheEntry);

    async fn has(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    async fn remove(&self, key: &str);

    /// Remove every key starting with `prefix`, returning how many went
    async fn remove_prefix(&self, prefix: &str) -> usize;

    async fn clear(&self);
}

struct EntryExpiry;

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-memory store on top of a moka cache
#[derive(Clone)]
pub struct MokaCacheStore {
    cache: Cache<String, CacheEntry>,
}

impl MokaCacheStore {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();
        Self { cache }
    }

    pub fn shared(max_capacity: u64) -> Arc<dyn CacheStore> {
        Arc::new(Self::new(max_capacity))
    }
}

impl Default for MokaCacheStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheStore for MokaCacheStore {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.cache.get(key).await?;
        if entry.is_expired() {
            self.cache.invalidate(key).await;
            return None;
        }
        Some(entry)
    }

    async fn set(&self, key: String, entry: CacheEntry) {
        self.cache.insert(key, entry).await;
    }

    async fn remove(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    async fn remove_prefix(&self, prefix: &str) -> usize {
        let keys: Vec<Arc<String>> = self
            .cache
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k)
            .collect();

        for key in &keys {
            self.cache.invalidate(key.as_str()).await;
        }
        debug!(prefix = %prefix, removed = keys.len(), "Invalidated cache entries");
        keys.len()
    }

    async fn clear(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MokaCacheStore::default();
        store
            .set("getPost:5".to_string(), CacheEntry::new(json!({"id": 5}), Duration::from_secs(60)))
            .await;

        assert!(store.has("getPost:5").await);
        assert_eq!(store.get("getPost:5").await.unwrap().value, json!({"id": 5}));

        store.remove("getPost:5").await;
        assert!(!store.has("getPost:5").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_not_returned() {
        let store = MokaCacheStore::default();
        store
            .set("getPost:1".to_string(), CacheEntry::new(json!(1), Duration::from_secs(5)))
            .await;
        assert!(store.has("getPost:1").await);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.get("getPost:1").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_prefix() {
        let store = MokaCacheStore::default();
        let ttl = Duration::from_secs(60);
        store.set("getPost:1".to_string(), CacheEntry::new(json!(1), ttl)).await;
        store.set("getPost:2".to_string(), CacheEntry::new(json!(2), ttl)).await;
        store.set("listPosts:null".to_string(), CacheEntry::new(json!([]), ttl)).await;

        assert_eq!(store.remove_prefix("getPost:").await, 2);
        assert!(!store.has("getPost:1").await);
        assert!(!store.has("getPost:2").await);
        assert!(store.has("listPosts:null").await);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MokaCacheStore::default();
        let ttl = Duration::from_secs(60);
        store.set("a:1".to_string(), CacheEntry::new(json!(1), ttl)).await;
        store.set("b:1".to_string(), CacheEntry::new(json!(1), ttl)).await;

        store.clear().await;
        assert!(!store.has("a:1").await);
        assert!(!store.has("b:1").await);
    }
}
