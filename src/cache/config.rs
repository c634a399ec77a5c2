//! Cache configuration and TTL policy.

use std::time::Duration;

/// Schema version prefix of every key. Bump it to orphan all cached shapes
/// after a response format change.
pub const CACHE_VERSION: &str = "v2";

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 5_000;
/// Entry bound of the in-process store.
pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// Cacheable resources and their time-to-live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheResource {
    TenderList,
    TenderDetail,
    Stats,
    AuthorityList,
    Suggestions,
}

impl CacheResource {
    pub fn tag(self) -> &'static str {
        match self {
            CacheResource::TenderList => "tenders",
            CacheResource::TenderDetail => "tender",
            CacheResource::Stats => "stats",
            CacheResource::AuthorityList => "lpse-list",
            CacheResource::Suggestions => "suggestions",
        }
    }

    pub fn ttl(self) -> Duration {
        match self {
            CacheResource::TenderList => Duration::from_secs(6 * 60 * 60),
            CacheResource::TenderDetail => Duration::from_secs(24 * 60 * 60),
            CacheResource::Stats => Duration::from_secs(60 * 60),
            CacheResource::AuthorityList => Duration::from_secs(24 * 60 * 60),
            CacheResource::Suggestions => Duration::from_secs(5 * 60),
        }
    }

    /// Resource served at an HTTP path, used for edge cache headers.
    pub fn for_path(path: &str) -> Option<Self> {
        match path {
            "/api/tenders" => Some(CacheResource::TenderList),
            "/api/tenders/search" => Some(CacheResource::Suggestions),
            "/api/stats" => Some(CacheResource::Stats),
            "/api/lpse" => Some(CacheResource::AuthorityList),
            _ if path.starts_with("/api/tenders/") => Some(CacheResource::TenderDetail),
            _ => None,
        }
    }
}

/// TTL applied when a lookup is confirmed empty and the null sentinel is stored.
pub const NEGATIVE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheBackend {
    #[default]
    Redis,
    Memory,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub warming: bool,
    pub backend: CacheBackend,
    pub url: Option<String>,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    /// Cooldown after a failed connect before the next attempt.
    pub retry_backoff: Duration,
    pub memory_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warming: true,
            backend: CacheBackend::Redis,
            url: None,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            operation_timeout: Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS),
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            warming: settings.warming,
            backend: settings.backend,
            url: settings.url.clone(),
            connect_timeout: settings.connect_timeout,
            operation_timeout: settings.operation_timeout,
            retry_backoff: settings.retry_backoff,
            memory_capacity: settings.memory_capacity,
        }
    }
}

impl CacheConfig {
    /// Warming only makes sense while caching itself is on.
    pub fn warming_enabled(&self) -> bool {
        self.enabled && self.warming
    }
}
