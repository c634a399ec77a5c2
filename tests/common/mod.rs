#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use axum::Router;
use tenderscope::application::pagination::PageRequest;
use tenderscope::application::repos::{RepoError, TenderPage, TendersRepo, query_cost};
use tenderscope::application::search::{SearchMode, SearchPredicate, TenderPredicate};
use tenderscope::application::tenders::TenderService;
use tenderscope::cache::{CacheWarmer, MemoryStore, ResponseCache};
use tenderscope::config::{CorsSettings, DeploymentEnvironment};
use tenderscope::domain::entities::{
    AuthorityRecord, GroupCount, TableCounts, TenderDetail, TenderRecord, TenderStats,
    TenderSuggestion,
};
use tenderscope::domain::types::TenderCode;
use tenderscope::infra::http::{HttpState, build_router};
use tenderscope::infra::monitoring::{Monitor, MonitorConfig};
use time::{Duration, OffsetDateTime, macros::datetime};

/// In-memory repository that counts store queries the way Postgres would issue them.
pub struct FakeRepo {
    tenders: Vec<TenderRecord>,
    queries: AtomicU64,
    pub fail: bool,
}

impl FakeRepo {
    pub fn with_tenders(count: usize) -> Self {
        let base = datetime!(2024-01-01 00:00 UTC);
        let tenders = (1..=count)
            .map(|n| sample_tender(n as i64, base + Duration::hours(n as i64)))
            .collect();
        Self {
            tenders,
            queries: AtomicU64::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::with_tenders(0)
        }
    }

    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    fn issue(&self, count: u64) -> Result<(), RepoError> {
        self.queries.fetch_add(count, Ordering::SeqCst);
        if self.fail {
            Err(RepoError::from_persistence("relation \"tenders\" does not exist"))
        } else {
            Ok(())
        }
    }

    fn newest_first(&self) -> Vec<&TenderRecord> {
        let mut rows: Vec<&TenderRecord> = self.tenders.iter().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }
}

pub fn authority() -> AuthorityRecord {
    AuthorityRecord {
        id: 1,
        code: Some("LPSE-BDG".into()),
        name: "LPSE Kota Bandung".into(),
        province: Some("Jawa Barat".into()),
        city: Some("Bandung".into()),
        total_tenders: 25,
    }
}

pub fn sample_tender(n: i64, created_at: OffsetDateTime) -> TenderRecord {
    TenderRecord {
        id: n,
        code: format!("{}", 10_000 + n),
        rup_code: Some(format!("{}", 50_000 + n)),
        name: if n % 2 == 0 {
            format!("Pembangunan Jalan Tol Seksi {n}")
        } else {
            format!("Pengadaan Alat Kesehatan {n}")
        },
        authority_id: 1,
        category: Some("Pekerjaan Konstruksi".into()),
        status: Some("Aktif".into()),
        stage: Some("Pengumuman".into()),
        budget_value: Some(1_000_000.0 * n as f64),
        estimate_value: None,
        fiscal_year: Some(2024),
        detail_url: None,
        created_at,
        updated_at: created_at,
        authority: authority(),
    }
}

fn matches_search(tender: &TenderRecord, search: &SearchPredicate) -> bool {
    let rup = tender.rup_code.as_deref().unwrap_or("");
    match search {
        SearchPredicate::PrefixMatch(code) => tender.code.starts_with(code) || rup.starts_with(code),
        SearchPredicate::TokenMatch(tokens) => tokens.iter().all(|token| {
            let token = token.to_lowercase();
            tender.code.contains(&token)
                || rup.contains(&token)
                || tender.name.to_lowercase().contains(&token)
                || tender.authority.name.to_lowercase().contains(&token)
        }),
        SearchPredicate::FullText(phrase) => tender.name.to_lowercase().contains(&phrase.to_lowercase()),
    }
}

fn matches(tender: &TenderRecord, predicate: &TenderPredicate) -> bool {
    if let Some(search) = predicate.search.as_ref()
        && !matches_search(tender, search)
    {
        return false;
    }
    let budget = tender.budget_value.unwrap_or(0.0);
    predicate.min_value.is_none_or(|min| budget >= min)
        && predicate.max_value.is_none_or(|max| budget <= max)
        && predicate.source_id.is_none_or(|id| tender.authority_id == id)
        && predicate.fiscal_year.is_none_or(|year| tender.fiscal_year == Some(year))
}

#[async_trait]
impl TendersRepo for FakeRepo {
    async fn list_tenders(
        &self,
        predicate: &TenderPredicate,
        page: PageRequest,
    ) -> Result<TenderPage, RepoError> {
        self.issue(query_cost::LIST_TENDERS)?;
        let matched: Vec<&TenderRecord> = self
            .newest_first()
            .into_iter()
            .filter(|tender| matches(tender, predicate))
            .collect();
        let rows = matched
            .iter()
            .skip(page.skip() as usize)
            .take(page.limit as usize)
            .map(|tender| (*tender).clone())
            .collect();
        Ok(TenderPage {
            total: matched.len() as u64,
            rows,
        })
    }

    async fn find_tender(&self, code: &TenderCode) -> Result<Option<TenderDetail>, RepoError> {
        self.issue(query_cost::FIND_TENDER)?;
        Ok(self
            .tenders
            .iter()
            .find(|tender| tender.code == code.as_str())
            .map(|tender| TenderDetail {
                tender: tender.clone(),
                requirements: None,
            }))
    }

    async fn suggest_tenders(
        &self,
        predicate: &SearchPredicate,
        limit: u32,
    ) -> Result<Vec<TenderSuggestion>, RepoError> {
        self.issue(query_cost::SUGGEST_TENDERS)?;
        Ok(self
            .newest_first()
            .into_iter()
            .filter(|tender| matches_search(tender, predicate))
            .take(limit as usize)
            .map(|tender| TenderSuggestion {
                id: tender.id,
                code: tender.code.clone(),
                name: tender.name.clone(),
                category: tender.category.clone(),
                status: tender.status.clone(),
                authority_name: Some(tender.authority.name.clone()),
                budget_value: tender.budget_value,
            })
            .collect())
    }

    async fn tender_stats(&self, recent: u32) -> Result<TenderStats, RepoError> {
        self.issue(query_cost::TENDER_STATS)?;
        let total = self.tenders.len() as i64;
        let average = if total == 0 {
            0.0
        } else {
            self.tenders
                .iter()
                .filter_map(|tender| tender.budget_value)
                .sum::<f64>()
                / total as f64
        };
        Ok(TenderStats {
            total_tenders: total,
            total_authorities: 1,
            average_budget: average,
            by_category: vec![GroupCount {
                label: "Pekerjaan Konstruksi".into(),
                count: total,
            }],
            by_status: vec![GroupCount {
                label: "Aktif".into(),
                count: total,
            }],
            by_province: vec![GroupCount {
                label: "Jawa Barat".into(),
                count: 25,
            }],
            recent_tenders: self
                .newest_first()
                .into_iter()
                .take(recent as usize)
                .cloned()
                .collect(),
        })
    }

    async fn list_authorities(&self) -> Result<Vec<AuthorityRecord>, RepoError> {
        self.issue(query_cost::LIST_AUTHORITIES)?;
        Ok(vec![authority()])
    }

    async fn table_counts(&self) -> Result<TableCounts, RepoError> {
        self.issue(2)?;
        Ok(TableCounts {
            tenders: self.tenders.len() as i64,
            authorities: 1,
        })
    }

    async fn ping(&self) -> Result<(), RepoError> {
        self.issue(1)
    }
}

pub struct TestApp {
    pub router: Router,
    pub repo: Arc<FakeRepo>,
    pub service: Arc<TenderService>,
    pub warmer: Arc<CacheWarmer>,
}

pub fn app_with(repo: FakeRepo, environment: DeploymentEnvironment) -> TestApp {
    let repo = Arc::new(repo);
    let cache = ResponseCache::new(Arc::new(MemoryStore::new()));
    let warmer = Arc::new(CacheWarmer::new(cache.clone(), true));
    let service = Arc::new(TenderService::new(
        repo.clone(),
        cache,
        warmer.clone(),
        Arc::new(Monitor::new(MonitorConfig::default())),
        SearchMode::Contains,
    ));
    let router = build_router(
        HttpState {
            tenders: service.clone(),
            environment,
        },
        &CorsSettings::default(),
    );
    TestApp {
        router,
        repo,
        service,
        warmer,
    }
}

pub fn app(tenders: usize) -> TestApp {
    app_with(FakeRepo::with_tenders(tenders), DeploymentEnvironment::Development)
}
