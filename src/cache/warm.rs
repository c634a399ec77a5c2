//! Best-effort cache warming, deduplicated per process lifetime.
//!
//! A key is fetched and stored at most once while the process runs, regardless
//! of TTL expiry. Failures are logged and swallowed here; they never reach the
//! request that triggered the warm.

use std::{
    collections::HashSet,
    fmt::Display,
    future::Future,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, warn};

use super::lock::lock_recovering;
use super::store::ResponseCache;

const SOURCE: &str = "cache::warm";

/// A key to populate, its TTL and the loader that produces the payload.
pub struct WarmTask<F> {
    pub key: String,
    pub ttl: Duration,
    pub fetcher: F,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmOutcome {
    Disabled,
    Unavailable,
    AlreadyWarmed,
    Stored,
    StoreFailed,
    FetchFailed,
}

impl WarmOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            WarmOutcome::Disabled => "disabled",
            WarmOutcome::Unavailable => "unavailable",
            WarmOutcome::AlreadyWarmed => "already_warmed",
            WarmOutcome::Stored => "stored",
            WarmOutcome::StoreFailed => "store_failed",
            WarmOutcome::FetchFailed => "fetch_failed",
        }
    }
}

pub struct CacheWarmer {
    enabled: bool,
    cache: ResponseCache,
    warmed: Mutex<HashSet<String>>,
}

impl CacheWarmer {
    pub fn new(cache: ResponseCache, enabled: bool) -> Self {
        Self {
            enabled,
            cache,
            warmed: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_warmed(&self, key: &str) -> bool {
        lock_recovering(&self.warmed, SOURCE).contains(key)
    }

    pub async fn warm_once<F, Fut, T, E>(&self, task: WarmTask<F>) -> WarmOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize,
        E: Display,
    {
        let outcome = self.run(task).await;
        counter!("tenderscope_cache_warm_total", "outcome" => outcome.as_str()).increment(1);
        outcome
    }

    async fn run<F, Fut, T, E>(&self, task: WarmTask<F>) -> WarmOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize,
        E: Display,
    {
        if !self.enabled {
            return WarmOutcome::Disabled;
        }
        if !self.cache.is_available().await {
            return WarmOutcome::Unavailable;
        }
        // Check and mark in one step so concurrent triggers fetch once.
        if !lock_recovering(&self.warmed, SOURCE).insert(task.key.clone()) {
            return WarmOutcome::AlreadyWarmed;
        }

        let started = Instant::now();
        let result = (task.fetcher)().await;
        histogram!("tenderscope_cache_warm_ms").record(started.elapsed().as_secs_f64() * 1_000.0);

        match result {
            Ok(value) => {
                if self.cache.set_json(&task.key, Some(&value), task.ttl).await {
                    debug!(target = "tenderscope::cache::warm", key = %task.key, "cache key warmed");
                    WarmOutcome::Stored
                } else {
                    WarmOutcome::StoreFailed
                }
            }
            Err(err) => {
                lock_recovering(&self.warmed, SOURCE).remove(&task.key);
                warn!(
                    target = "tenderscope::cache::warm",
                    key = %task.key,
                    error = %err,
                    "cache warm failed"
                );
                WarmOutcome::FetchFailed
            }
        }
    }

    /// Run the warm on its own task so it outlives the triggering request.
    pub fn spawn<F, Fut, T, E>(self: &Arc<Self>, task: WarmTask<F>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + Send + Sync + 'static,
        E: Display + Send + 'static,
    {
        let warmer = Arc::clone(self);
        tokio::spawn(async move {
            warmer.warm_once(task).await;
        });
    }
}
