//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::application::pagination::PageRequest;
use crate::application::search::{SearchPredicate, TenderPredicate};
use crate::domain::entities::{
    AuthorityRecord, TableCounts, TenderDetail, TenderRecord, TenderStats, TenderSuggestion,
};
use crate::domain::types::TenderCode;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// One page of tenders plus the total matched by the same predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct TenderPage {
    pub total: u64,
    pub rows: Vec<TenderRecord>,
}

/// Number of store round-trips each operation issues, reported to the monitor.
pub mod query_cost {
    pub const LIST_TENDERS: u64 = 2;
    pub const FIND_TENDER: u64 = 1;
    pub const TENDER_STATS: u64 = 7;
    pub const LIST_AUTHORITIES: u64 = 1;
    pub const SUGGEST_TENDERS: u64 = 1;
}

#[async_trait]
pub trait TendersRepo: Send + Sync {
    /// Count and fetch one page, newest first, using a single predicate.
    async fn list_tenders(
        &self,
        predicate: &TenderPredicate,
        page: PageRequest,
    ) -> Result<TenderPage, RepoError>;

    async fn find_tender(&self, code: &TenderCode) -> Result<Option<TenderDetail>, RepoError>;

    async fn suggest_tenders(
        &self,
        predicate: &SearchPredicate,
        limit: u32,
    ) -> Result<Vec<TenderSuggestion>, RepoError>;

    async fn tender_stats(&self, recent: u32) -> Result<TenderStats, RepoError>;

    /// All issuing authorities ordered by name.
    async fn list_authorities(&self) -> Result<Vec<AuthorityRecord>, RepoError>;

    async fn table_counts(&self) -> Result<TableCounts, RepoError>;

    /// Cheapest possible round-trip, used by the health probe.
    async fn ping(&self) -> Result<(), RepoError>;
}
