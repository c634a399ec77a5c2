//! Redis-backed cache store.
//!
//! The multiplexed connection is opened lazily on first use and shared by all
//! callers. Concurrent first users queue on the slot lock, so only one connect
//! attempt is in flight at a time. After a failed attempt the store stays
//! unavailable for `retry_backoff` before trying again.

use std::{
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use redis::{AsyncCommands, Client, RedisError, RedisResult, aio::MultiplexedConnection};
use tokio::{sync::Mutex, time::timeout};
use tracing::{debug, info, warn};

use super::config::CacheConfig;
use super::store::{CacheError, CacheStore};

const SCAN_BATCH: usize = 100;
/// Prefix deletes walk the whole keyspace, so they get a longer bound than single-key ops.
const PURGE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct ConnectionSlot {
    conn: Option<MultiplexedConnection>,
    last_failure: Option<Instant>,
}

pub struct RedisStore {
    client: Client,
    slot: Mutex<ConnectionSlot>,
    unavailable_logged: AtomicBool,
    connect_timeout: Duration,
    operation_timeout: Duration,
    retry_backoff: Duration,
}

impl RedisStore {
    pub fn open(url: &str, config: &CacheConfig) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(|err| CacheError::InvalidUrl(err.to_string()))?;
        Ok(Self {
            client,
            slot: Mutex::new(ConnectionSlot::default()),
            unavailable_logged: AtomicBool::new(false),
            connect_timeout: config.connect_timeout,
            operation_timeout: config.operation_timeout,
            retry_backoff: config.retry_backoff,
        })
    }

    async fn connection(&self) -> Option<MultiplexedConnection> {
        let mut slot = self.slot.lock().await;
        if let Some(conn) = &slot.conn {
            return Some(conn.clone());
        }
        if let Some(failed_at) = slot.last_failure
            && failed_at.elapsed() < self.retry_backoff
        {
            return None;
        }

        match timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(Ok(conn)) => {
                slot.conn = Some(conn.clone());
                slot.last_failure = None;
                self.mark_recovered();
                Some(conn)
            }
            Ok(Err(err)) => {
                slot.last_failure = Some(Instant::now());
                self.mark_unavailable("connect", &err.to_string());
                None
            }
            Err(_) => {
                slot.last_failure = Some(Instant::now());
                self.mark_unavailable("connect", "connection attempt timed out");
                None
            }
        }
    }

    async fn drop_connection(&self) {
        let mut slot = self.slot.lock().await;
        slot.conn = None;
        slot.last_failure = Some(Instant::now());
    }

    fn mark_unavailable(&self, op: &'static str, reason: &str) {
        if !self.unavailable_logged.swap(true, Ordering::SeqCst) {
            warn!(
                target = "tenderscope::cache",
                op,
                reason,
                "cache backend unavailable, serving from the database"
            );
        }
    }

    fn mark_recovered(&self) {
        if self.unavailable_logged.swap(false, Ordering::SeqCst) {
            info!(target = "tenderscope::cache", "cache backend reconnected");
        }
    }

    async fn run<T, F, Fut>(&self, op: &'static str, bound: Duration, call: F) -> Option<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.connection().await?;
        match timeout(bound, call(conn)).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) if is_connection_error(&err) => {
                self.drop_connection().await;
                self.mark_unavailable(op, &err.to_string());
                None
            }
            Ok(Err(err)) => {
                debug!(target = "tenderscope::cache", op, error = %err, "cache command failed");
                None
            }
            Err(_) => {
                self.drop_connection().await;
                self.mark_unavailable(op, "command timed out");
                None
            }
        }
    }
}

fn is_connection_error(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout()
}

/// Escape glob metacharacters so a prefix only matches literally in `SCAN MATCH`.
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[async_trait]
impl CacheStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn is_available(&self) -> bool {
        self.connection().await.is_some()
    }

    async fn get(&self, key: &str) -> Option<String> {
        let key = key.to_string();
        self.run("get", self.operation_timeout, |mut conn| async move {
            conn.get::<_, Option<String>>(&key).await
        })
        .await
        .flatten()
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let key = key.to_string();
        let value = value.to_string();
        let seconds = ttl.as_secs().max(1);
        self.run("set", self.operation_timeout, |mut conn| async move {
            conn.set_ex::<_, _, ()>(&key, &value, seconds).await
        })
        .await
        .is_some()
    }

    async fn delete(&self, key: &str) -> bool {
        let key = key.to_string();
        self.run("delete", self.operation_timeout, |mut conn| async move {
            conn.del::<_, i64>(&key).await
        })
        .await
        .is_some_and(|removed| removed > 0)
    }

    async fn delete_by_prefix(&self, prefix: &str) -> u64 {
        let pattern = format!("{}*", glob_escape(prefix));
        self.run("delete_by_prefix", PURGE_TIMEOUT, |mut conn| async move {
            let mut cursor: u64 = 0;
            let mut removed: u64 = 0;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await?;
                if !keys.is_empty() {
                    removed += conn.del::<_, u64>(&keys).await?;
                }
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok(removed)
        })
        .await
        .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, atomic::AtomicUsize};

    use super::*;

    fn unreachable() -> RedisStore {
        let config = CacheConfig {
            connect_timeout: Duration::from_millis(200),
            operation_timeout: Duration::from_millis(200),
            retry_backoff: Duration::from_secs(60),
            ..Default::default()
        };
        RedisStore::open("redis://127.0.0.1:1/", &config).expect("valid url")
    }

    #[tokio::test]
    async fn unreachable_backend_fails_soft() {
        let store = unreachable();
        assert_eq!(store.get("v2:stats").await, None);
        assert!(!store.set("v2:stats", "{}", Duration::from_secs(5)).await);
        assert!(!store.delete("v2:stats").await);
        assert_eq!(store.delete_by_prefix("v2:").await, 0);
        assert!(!store.is_available().await);
        assert!(store.unavailable_logged.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failed_connect_is_not_retried_during_backoff() {
        let store = unreachable();
        assert!(!store.is_available().await);
        let first_failure = store.slot.lock().await.last_failure;
        assert!(first_failure.is_some());

        assert!(!store.is_available().await);
        assert_eq!(store.slot.lock().await.last_failure, first_failure);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_use_shares_one_connect_attempt() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("listener addr");
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        let server = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                open.push(socket);
            }
        });

        let config = CacheConfig {
            connect_timeout: Duration::from_millis(300),
            operation_timeout: Duration::from_millis(300),
            retry_backoff: Duration::from_secs(60),
            ..Default::default()
        };
        let store = Arc::new(
            RedisStore::open(&format!("redis://{addr}/"), &config).expect("valid url"),
        );

        let callers: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.is_available().await })
            })
            .collect();
        for caller in callers {
            caller.await.expect("caller task");
        }

        assert!(accepted.load(Ordering::SeqCst) <= 1);
        server.abort();
    }

    #[test]
    fn malformed_url_is_rejected() {
        let result = RedisStore::open("not a url", &CacheConfig::default());
        assert!(matches!(result, Err(CacheError::InvalidUrl(_))));
    }

    #[test]
    fn prefix_glob_is_escaped() {
        assert_eq!(glob_escape("v2:tenders"), "v2:tenders");
        assert_eq!(glob_escape("v2:a*b?[c]"), r"v2:a\*b\?\[c\]");
    }
}
