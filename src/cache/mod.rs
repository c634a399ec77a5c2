//! Response cache for the tender API.
//!
//! Responses are cached as JSON envelopes under versioned keys in a shared
//! key-value store. The store is optional: without a reachable backend every
//! lookup misses and requests are served straight from the database.

mod config;
pub mod keys;
mod lock;
mod redis_store;
mod store;
mod warm;

pub(crate) use lock::lock_recovering;

pub use config::{CACHE_VERSION, CacheBackend, CacheConfig, CacheResource, NEGATIVE_TTL};
pub use redis_store::RedisStore;
pub use store::{
    CACHE_NULL, CacheError, CacheLookup, CacheStore, MemoryStore, NullStore, ResponseCache,
    build_store,
};
pub use warm::{CacheWarmer, WarmOutcome, WarmTask};
