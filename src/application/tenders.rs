//! Cache-aware read paths for the tender API.
//!
//! Every operation follows the same pipeline: derive the key, consult the
//! cache unless bypassed, load from the repository on a miss, write the
//! envelope back and feed the monitor.

use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::application::filters::TenderQuery;
use crate::application::pagination::{PageRequest, PaginationMeta};
use crate::application::repos::{RepoError, TenderPage, TendersRepo, query_cost};
use crate::application::response::ApiResponse;
use crate::application::search::{
    SUGGESTION_LIMIT, SearchMode, TenderPredicate, suggestion_predicate,
};
use crate::cache::{
    CacheLookup, CacheResource, CacheWarmer, NEGATIVE_TTL, ResponseCache, WarmTask, keys,
};
use crate::domain::entities::{
    AuthorityRecord, TenderDetail, TenderRecord, TenderStats, TenderSuggestion,
};
use crate::domain::error::DomainError;
use crate::domain::types::TenderCode;
use crate::infra::monitoring::{Monitor, MonitorSnapshot};

/// Route names used as monitor and metric labels.
pub mod routes {
    pub const TENDERS: &str = "api.tenders";
    pub const TENDER: &str = "api.tender";
    pub const STATS: &str = "api.stats";
    pub const AUTHORITIES: &str = "api.lpse";
    pub const SUGGESTIONS: &str = "api.tenders.search";
}

const RECENT_TENDERS: u32 = 5;

pub type TenderList = ApiResponse<Vec<TenderRecord>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

/// A response body plus how it was produced.
#[derive(Debug, Clone)]
pub struct Served<T> {
    pub body: T,
    pub cache: CacheStatus,
    pub key: String,
    pub elapsed: Duration,
}

impl<T> Served<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> Served<U> {
        Served {
            body: f(self.body),
            cache: self.cache,
            key: self.key,
            elapsed: self.elapsed,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid tender code: {0}")]
    InvalidCode(#[from] DomainError),
    #[error("tender not found")]
    NotFound {
        cache: CacheStatus,
        key: String,
        elapsed: Duration,
    },
    #[error(transparent)]
    Repo(#[from] RepoError),
}

struct CachePlan {
    route: &'static str,
    key: String,
    ttl: Duration,
    /// Cache confirmed-empty loads as the null sentinel for this long.
    negative_ttl: Option<Duration>,
    bypass: bool,
    cost: u64,
}

#[derive(Clone)]
pub struct TenderService {
    repo: Arc<dyn TendersRepo>,
    cache: ResponseCache,
    warmer: Arc<CacheWarmer>,
    monitor: Arc<Monitor>,
    search_mode: SearchMode,
}

impl TenderService {
    pub fn new(
        repo: Arc<dyn TendersRepo>,
        cache: ResponseCache,
        warmer: Arc<CacheWarmer>,
        monitor: Arc<Monitor>,
        search_mode: SearchMode,
    ) -> Self {
        Self {
            repo,
            cache,
            warmer,
            monitor,
            search_mode,
        }
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub async fn list_tenders(
        &self,
        query: &TenderQuery,
        bypass: bool,
    ) -> Result<Served<TenderList>, ServiceError> {
        let plan = CachePlan {
            route: routes::TENDERS,
            key: keys::list_key(query),
            ttl: CacheResource::TenderList.ttl(),
            negative_ttl: None,
            bypass,
            cost: query_cost::LIST_TENDERS,
        };
        // Resolved once so the count and the page share the same predicate.
        let predicate = TenderPredicate::resolve(&query.filters, self.search_mode);
        let page = query.page;
        let repo = Arc::clone(&self.repo);

        let served = self
            .serve_cached(plan, || async move {
                let rows = repo.list_tenders(&predicate, page).await?;
                Ok::<_, ServiceError>(Some(list_envelope(rows, page)))
            })
            .await?;
        let served = required(served);

        debug!(
            target = "tenderscope::tenders",
            route = routes::TENDERS,
            cache = served.cache.as_str(),
            elapsed_ms = served.elapsed.as_secs_f64() * 1_000.0,
            items = served.body.data.as_ref().map_or(0, Vec::len),
            total = served.body.pagination.map_or(0, |meta| meta.total),
            "tenders listed"
        );
        Ok(served)
    }

    pub async fn tender_detail(
        &self,
        raw_code: &str,
        bypass: bool,
    ) -> Result<Served<ApiResponse<TenderDetail>>, ServiceError> {
        let code = match TenderCode::parse(raw_code) {
            Ok(code) => code,
            Err(err) => {
                self.monitor.record_error(routes::TENDER);
                return Err(err.into());
            }
        };

        let plan = CachePlan {
            route: routes::TENDER,
            key: keys::detail_key(&code),
            ttl: CacheResource::TenderDetail.ttl(),
            negative_ttl: Some(NEGATIVE_TTL),
            bypass,
            cost: query_cost::FIND_TENDER,
        };
        let repo = Arc::clone(&self.repo);

        let served = self
            .serve_cached(plan, || async move {
                let detail = repo.find_tender(&code).await?;
                Ok::<_, ServiceError>(detail.map(ApiResponse::ok))
            })
            .await?;

        debug!(
            target = "tenderscope::tenders",
            route = routes::TENDER,
            cache = served.cache.as_str(),
            elapsed_ms = served.elapsed.as_secs_f64() * 1_000.0,
            found = served.body.is_some(),
            "tender detail served"
        );

        match served.body {
            Some(body) => Ok(Served {
                body,
                cache: served.cache,
                key: served.key,
                elapsed: served.elapsed,
            }),
            None => Err(ServiceError::NotFound {
                cache: served.cache,
                key: served.key,
                elapsed: served.elapsed,
            }),
        }
    }

    /// Aggregate statistics. A fresh load also warms the landing page and the
    /// authority directory in the background.
    pub async fn stats(
        &self,
        bypass: bool,
    ) -> Result<Served<ApiResponse<TenderStats>>, ServiceError> {
        let plan = CachePlan {
            route: routes::STATS,
            key: keys::stats_key(),
            ttl: CacheResource::Stats.ttl(),
            negative_ttl: None,
            bypass,
            cost: query_cost::TENDER_STATS,
        };
        let repo = Arc::clone(&self.repo);

        let served = self
            .serve_cached(plan, || async move {
                let stats = repo.tender_stats(RECENT_TENDERS).await?;
                Ok::<_, ServiceError>(Some(ApiResponse::ok(stats)))
            })
            .await?;
        let served = required(served);

        if served.cache != CacheStatus::Hit {
            self.warm_landing_pages();
        }

        debug!(
            target = "tenderscope::tenders",
            route = routes::STATS,
            cache = served.cache.as_str(),
            elapsed_ms = served.elapsed.as_secs_f64() * 1_000.0,
            "stats served"
        );
        Ok(served)
    }

    pub async fn authorities(
        &self,
        bypass: bool,
    ) -> Result<Served<ApiResponse<Vec<AuthorityRecord>>>, ServiceError> {
        let plan = CachePlan {
            route: routes::AUTHORITIES,
            key: keys::authority_list_key(),
            ttl: CacheResource::AuthorityList.ttl(),
            negative_ttl: None,
            bypass,
            cost: query_cost::LIST_AUTHORITIES,
        };
        let repo = Arc::clone(&self.repo);

        let served = self
            .serve_cached(plan, || async move {
                let authorities = repo.list_authorities().await?;
                Ok::<_, ServiceError>(Some(ApiResponse::ok(authorities)))
            })
            .await?;
        let served = required(served);

        debug!(
            target = "tenderscope::tenders",
            route = routes::AUTHORITIES,
            cache = served.cache.as_str(),
            elapsed_ms = served.elapsed.as_secs_f64() * 1_000.0,
            items = served.body.data.as_ref().map_or(0, Vec::len),
            "authorities listed"
        );
        Ok(served)
    }

    /// Autocomplete lookup. Queries that are too short or carry no usable
    /// token answer an empty list without touching the cache or the store.
    pub async fn suggestions(
        &self,
        query: &str,
        bypass: bool,
    ) -> Result<Served<ApiResponse<Vec<TenderSuggestion>>>, ServiceError> {
        let started = Instant::now();
        let predicate = suggestion_predicate(query);
        let key = keys::suggestions_key(predicate.as_ref());

        let Some(predicate) = predicate else {
            return Ok(Served {
                body: ApiResponse::ok(Vec::new()),
                cache: CacheStatus::Bypass,
                key,
                elapsed: started.elapsed(),
            });
        };

        let plan = CachePlan {
            route: routes::SUGGESTIONS,
            key,
            ttl: CacheResource::Suggestions.ttl(),
            negative_ttl: None,
            bypass,
            cost: query_cost::SUGGEST_TENDERS,
        };
        let repo = Arc::clone(&self.repo);

        let served = self
            .serve_cached(plan, || async move {
                let rows = repo.suggest_tenders(&predicate, SUGGESTION_LIMIT).await?;
                Ok::<_, ServiceError>(Some(ApiResponse::ok(rows)))
            })
            .await?;
        let served = required(served);

        debug!(
            target = "tenderscope::tenders",
            route = routes::SUGGESTIONS,
            cache = served.cache.as_str(),
            elapsed_ms = served.elapsed.as_secs_f64() * 1_000.0,
            items = served.body.data.as_ref().map_or(0, Vec::len),
            "suggestions served"
        );
        Ok(served)
    }

    pub async fn health(&self) -> HealthReport {
        let database = match tokio::try_join!(self.repo.ping(), self.repo.table_counts()) {
            Ok(((), counts)) => DatabaseHealth {
                status: "connected",
                tenders: Some(counts.tenders),
                authorities: Some(counts.authorities),
                error: None,
            },
            Err(err) => {
                warn!(target = "tenderscope::tenders", error = %err, "health probe failed");
                DatabaseHealth {
                    status: "error",
                    tenders: None,
                    authorities: None,
                    error: Some(err.to_string()),
                }
            }
        };

        let healthy = database.error.is_none();
        HealthReport {
            status: if healthy { "healthy" } else { "unhealthy" },
            timestamp: OffsetDateTime::now_utc(),
            database,
            cache: CacheHealth {
                backend: self.cache.store().backend(),
                available: self.cache.is_available().await,
            },
            monitor: self.monitor.snapshot(),
        }
    }

    async fn serve_cached<T, F, Fut>(
        &self,
        plan: CachePlan,
        load: F,
    ) -> Result<Served<Option<T>>, ServiceError>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, ServiceError>>,
    {
        let started = Instant::now();
        let result = self.lookup_or_load(&plan, load, started).await;
        if result.is_err() {
            self.monitor.record_error(plan.route);
        }
        self.monitor.log_if_needed(plan.route);
        result
    }

    async fn lookup_or_load<T, F, Fut>(
        &self,
        plan: &CachePlan,
        load: F,
        started: Instant,
    ) -> Result<Served<Option<T>>, ServiceError>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, ServiceError>>,
    {
        if !plan.bypass {
            let cached = match self.cache.get_json::<T>(&plan.key).await {
                CacheLookup::Hit(value) => Some(Some(value)),
                CacheLookup::Empty if plan.negative_ttl.is_some() => Some(None),
                CacheLookup::Empty | CacheLookup::Miss => None,
            };
            if let Some(body) = cached {
                self.monitor.record_cache_hit(plan.route);
                return Ok(self.finish(plan, body, CacheStatus::Hit, started));
            }
            self.monitor.record_cache_miss(plan.route);
        }

        let body = load().await?;
        self.monitor.record_db_query(plan.route, plan.cost);

        let ttl = match body {
            Some(_) => Some(plan.ttl),
            None => plan.negative_ttl,
        };
        if let Some(ttl) = ttl {
            self.store_detached(plan.key.clone(), body.clone(), ttl).await;
        }

        let status = if plan.bypass {
            CacheStatus::Bypass
        } else {
            CacheStatus::Miss
        };
        Ok(self.finish(plan, body, status, started))
    }

    fn finish<T>(
        &self,
        plan: &CachePlan,
        body: T,
        cache: CacheStatus,
        started: Instant,
    ) -> Served<T> {
        let elapsed = started.elapsed();
        self.monitor.record_timing(plan.route, elapsed);
        Served {
            body,
            cache,
            key: plan.key.clone(),
            elapsed,
        }
    }

    /// The write runs on its own task so an aborted request cannot cut it short.
    async fn store_detached<T>(&self, key: String, body: Option<T>, ttl: Duration)
    where
        T: Serialize + Send + Sync + 'static,
    {
        let cache = self.cache.clone();
        let write =
            tokio::spawn(async move { cache.set_json(&key, body.as_ref(), ttl).await });
        if let Err(err) = write.await {
            warn!(target = "tenderscope::cache", error = %err, "cache write task failed");
        }
    }

    fn warm_landing_pages(&self) {
        let landing = TenderQuery::default();
        let repo = Arc::clone(&self.repo);
        self.warmer.spawn(WarmTask {
            key: keys::list_key(&landing),
            ttl: CacheResource::TenderList.ttl(),
            fetcher: move || async move {
                let rows = repo
                    .list_tenders(&TenderPredicate::default(), landing.page)
                    .await?;
                Ok::<_, RepoError>(list_envelope(rows, landing.page))
            },
        });

        let repo = Arc::clone(&self.repo);
        self.warmer.spawn(WarmTask {
            key: keys::authority_list_key(),
            ttl: CacheResource::AuthorityList.ttl(),
            fetcher: move || async move {
                let authorities = repo.list_authorities().await?;
                Ok::<_, RepoError>(ApiResponse::ok(authorities))
            },
        });
    }
}

fn list_envelope(page: TenderPage, request: PageRequest) -> TenderList {
    ApiResponse::paginated(page.rows, PaginationMeta::new(page.total, request))
}

/// Loaders of always-present resources never yield `None`, and without a
/// negative TTL the sentinel reads as a miss. An absent body here is therefore
/// an empty payload rather than a missing resource.
fn required<T>(served: Served<Option<ApiResponse<T>>>) -> Served<ApiResponse<T>> {
    served.map(|body| {
        body.unwrap_or_else(|| ApiResponse::failure("Resource unavailable", None))
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseHealth {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenders: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorities: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub backend: &'static str,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub database: DatabaseHealth,
    pub cache: CacheHealth,
    pub monitor: MonitorSnapshot,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.database.error.is_none()
    }

    /// Drop the underlying database message before it leaves the process.
    pub fn redact(mut self) -> Self {
        if self.database.error.is_some() {
            self.database.error = Some("database unavailable".to_string());
        }
        self
    }
}
