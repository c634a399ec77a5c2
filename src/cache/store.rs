//! Key-value cache stores.
//!
//! Every store fails soft: a broken or missing backend reads as a miss and a
//! failed write reports `false`, never an error the request path must handle.

use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use lru::LruCache;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{info, warn};

use super::config::{CacheBackend, CacheConfig, DEFAULT_MEMORY_CAPACITY};
use super::lock::lock_recovering;
use super::redis_store::RedisStore;

const SOURCE: &str = "cache::store";

/// Stored in place of a payload when the lookup is confirmed empty.
pub const CACHE_NULL: &str = "__CACHE_NULL__";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache url: {0}")]
    InvalidUrl(String),
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn is_available(&self) -> bool;

    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool;

    async fn delete(&self, key: &str) -> bool;

    /// Remove every key starting with `prefix`, returning how many were removed.
    async fn delete_by_prefix(&self, prefix: &str) -> u64;
}

/// Always-miss store used when caching is disabled or unconfigured.
#[derive(Debug, Default)]
pub struct NullStore;

#[async_trait]
impl CacheStore for NullStore {
    fn backend(&self) -> &'static str {
        "none"
    }

    async fn is_available(&self) -> bool {
        false
    }

    async fn get(&self, _key: &str) -> Option<String> {
        None
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> bool {
        false
    }

    async fn delete(&self, _key: &str) -> bool {
        false
    }

    async fn delete_by_prefix(&self, _prefix: &str) -> u64 {
        0
    }
}

/// Process-local store with per-entry expiry, bounded by LRU eviction.
/// Expired entries are dropped on read or pushed out by newer writes.
pub struct MemoryStore {
    entries: Mutex<LruCache<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        lock_recovering(&self.entries, SOURCE).len()
    }

    pub fn is_empty(&self) -> bool {
        lock_recovering(&self.entries, SOURCE).is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut entries = lock_recovering(&self.entries, SOURCE);
        let fresh = entries
            .get(key)
            .map(|(value, expires)| (*expires > now).then(|| value.clone()));
        match fresh {
            Some(Some(value)) => Some(value),
            Some(None) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let expires = Instant::now() + ttl;
        lock_recovering(&self.entries, SOURCE).put(key.to_string(), (value.to_string(), expires));
        true
    }

    async fn delete(&self, key: &str) -> bool {
        lock_recovering(&self.entries, SOURCE).pop(key).is_some()
    }

    async fn delete_by_prefix(&self, prefix: &str) -> u64 {
        let mut entries = lock_recovering(&self.entries, SOURCE);
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len() as u64
    }
}

/// Result of a typed cache probe.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Miss,
    /// The null sentinel: the key is cached and confirmed to have no data.
    Empty,
    Hit(T),
}

/// JSON facade over a [`CacheStore`] that understands the null sentinel.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> CacheLookup<T> {
        let Some(raw) = self.store.get(key).await else {
            return CacheLookup::Miss;
        };
        if raw == CACHE_NULL {
            return CacheLookup::Empty;
        }
        match serde_json::from_str(&raw) {
            Ok(value) => CacheLookup::Hit(value),
            Err(err) => {
                warn!(
                    target = "tenderscope::cache",
                    key,
                    error = %err,
                    "discarding cache entry with unexpected shape"
                );
                CacheLookup::Miss
            }
        }
    }

    /// Write `value`, or the null sentinel when `None`.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: Option<&T>, ttl: Duration) -> bool {
        let payload = match value {
            Some(value) => match serde_json::to_string(value) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(
                        target = "tenderscope::cache",
                        key,
                        error = %err,
                        "failed to serialize cache payload"
                    );
                    return false;
                }
            },
            None => CACHE_NULL.to_string(),
        };
        self.store.set(key, &payload, ttl).await
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.store.delete(key).await
    }

    pub async fn is_available(&self) -> bool {
        self.store.is_available().await
    }
}

/// Pick the store implementation once at startup.
pub fn build_store(config: &CacheConfig) -> Arc<dyn CacheStore> {
    if !config.enabled {
        info!(target = "tenderscope::cache", "response cache disabled");
        return Arc::new(NullStore);
    }

    match config.backend {
        CacheBackend::Memory => Arc::new(MemoryStore::with_capacity(config.memory_capacity)),
        CacheBackend::Redis => match config.url.as_deref() {
            Some(url) => match RedisStore::open(url, config) {
                Ok(store) => Arc::new(store),
                Err(err) => {
                    warn!(
                        target = "tenderscope::cache",
                        error = %err,
                        "cache backend rejected, serving without cache"
                    );
                    Arc::new(NullStore)
                }
            },
            None => {
                warn!(
                    target = "tenderscope::cache",
                    "cache url not configured, serving without cache"
                );
                Arc::new(NullStore)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::pagination::{PageRequest, PaginationMeta};
    use crate::application::response::ApiResponse;

    #[tokio::test]
    async fn null_store_always_misses() {
        let cache = ResponseCache::new(Arc::new(NullStore));
        assert!(!cache.set_json("k", Some(&1_u32), Duration::from_secs(1)).await);
        assert_eq!(cache.get_json::<u32>("k").await, CacheLookup::Miss);
        assert!(!cache.is_available().await);
    }

    #[tokio::test]
    async fn empty_page_round_trips_through_store() {
        let cache = ResponseCache::new(Arc::new(MemoryStore::new()));
        let body = ApiResponse::paginated(
            Vec::<u32>::new(),
            PaginationMeta::new(0, PageRequest::default()),
        );

        assert!(cache.set_json("v2:tenders", Some(&body), Duration::from_secs(60)).await);
        assert_eq!(cache.get_json("v2:tenders").await, CacheLookup::Hit(body));
    }

    #[tokio::test]
    async fn null_sentinel_is_distinct_from_absence() {
        let cache = ResponseCache::new(Arc::new(MemoryStore::new()));
        assert!(cache.set_json::<u32>("v2:tender:1", None, Duration::from_secs(60)).await);
        assert_eq!(cache.get_json::<u32>("v2:tender:1").await, CacheLookup::Empty);
        assert_eq!(cache.get_json::<u32>("v2:tender:2").await, CacheLookup::Miss);
    }

    #[tokio::test]
    async fn malformed_entry_reads_as_miss() {
        let store = Arc::new(MemoryStore::new());
        store.set("k", "{not json", Duration::from_secs(60)).await;
        let cache = ResponseCache::new(store);
        assert_eq!(cache.get_json::<u32>("k").await, CacheLookup::Miss);
    }

    #[tokio::test]
    async fn memory_entries_expire() {
        let store = MemoryStore::new();
        store.set("k", "v", Duration::ZERO).await;
        assert_eq!(store.get("k").await, None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn delete_by_prefix_removes_matching_keys() {
        let store = MemoryStore::new();
        for key in ["v2:tenders:a", "v2:tenders:b", "v2:stats", "v1:tenders:a"] {
            store.set(key, "1", Duration::from_secs(60)).await;
        }
        assert_eq!(store.delete_by_prefix("v2:tenders").await, 2);
        assert_eq!(store.len(), 2);
        assert!(store.delete("v2:stats").await);
        assert!(!store.delete("v2:stats").await);
    }

    #[tokio::test]
    async fn memory_store_is_bounded_by_capacity() {
        let store = MemoryStore::with_capacity(100);
        for n in 0..1_000 {
            store.set(&format!("v2:suggestions:q{n}"), "[]", Duration::ZERO).await;
        }
        assert_eq!(store.len(), 100);

        store.set("v2:stats", "{}", Duration::from_secs(60)).await;
        assert_eq!(store.len(), 100);
        assert_eq!(store.get("v2:stats").await.as_deref(), Some("{}"));
        assert_eq!(store.get("v2:suggestions:q0").await, None);
    }

    #[tokio::test]
    async fn default_memory_store_stops_growing_at_default_capacity() {
        let store = MemoryStore::new();
        for n in 0..=DEFAULT_MEMORY_CAPACITY {
            store.set(&format!("k{n}"), "v", Duration::ZERO).await;
        }
        assert_eq!(store.len(), DEFAULT_MEMORY_CAPACITY);
    }

    #[tokio::test]
    async fn recently_read_entries_survive_eviction() {
        let store = MemoryStore::with_capacity(2);
        store.set("a", "1", Duration::from_secs(60)).await;
        store.set("b", "2", Duration::from_secs(60)).await;
        assert_eq!(store.get("a").await.as_deref(), Some("1"));
        store.set("c", "3", Duration::from_secs(60)).await;

        assert_eq!(store.get("b").await, None);
        assert_eq!(store.get("a").await.as_deref(), Some("1"));
        assert_eq!(store.get("c").await.as_deref(), Some("3"));
    }

    #[test]
    fn disabled_or_unconfigured_cache_uses_null_store() {
        let disabled = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        assert_eq!(build_store(&disabled).backend(), "none");
        assert_eq!(build_store(&CacheConfig::default()).backend(), "none");

        let memory = CacheConfig {
            backend: CacheBackend::Memory,
            ..Default::default()
        };
        assert_eq!(build_store(&memory).backend(), "memory");
    }
}
