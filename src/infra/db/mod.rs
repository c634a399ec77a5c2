//! Postgres-backed repository implementations.

mod tenders;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;

use sqlx::{
    Postgres, QueryBuilder,
    postgres::{PgPool, PgPoolOptions},
    query,
};

use crate::application::search::{SearchPredicate, TenderPredicate, code_fragments, escape_like};

/// Tender rows joined with their issuing authority.
const TENDER_FROM: &str = " FROM tenders t JOIN lpse l ON l.id = t.lpse_id WHERE 1=1";

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}

/// Append the search strategy and every set filter as `AND` clauses.
///
/// Codes are matched with `LIKE` and never case-folded; text columns use `ILIKE`.
pub(crate) fn push_predicate(qb: &mut QueryBuilder<'_, Postgres>, predicate: &TenderPredicate) {
    if let Some(search) = predicate.search.as_ref() {
        push_search(qb, search);
    }

    if let Some(category) = predicate.category.as_ref() {
        qb.push(" AND t.kategori_pekerjaan ILIKE ");
        qb.push_bind(format!("%{}%", escape_like(category)));
    }
    if let Some(status) = predicate.status.as_ref() {
        qb.push(" AND LOWER(t.status_tender) = LOWER(");
        qb.push_bind(status.clone());
        qb.push(")");
    }
    if let Some(source_id) = predicate.source_id {
        qb.push(" AND t.lpse_id = ");
        qb.push_bind(source_id);
    }
    if let Some(year) = predicate.fiscal_year {
        qb.push(" AND t.tahun_anggaran = ");
        qb.push_bind(year);
    }
    if let Some(min) = predicate.min_value {
        qb.push(" AND t.nilai_pagu >= ");
        qb.push_bind(min);
        qb.push("::numeric");
    }
    if let Some(max) = predicate.max_value {
        qb.push(" AND t.nilai_pagu <= ");
        qb.push_bind(max);
        qb.push("::numeric");
    }
}

pub(crate) fn push_search(qb: &mut QueryBuilder<'_, Postgres>, search: &SearchPredicate) {
    match search {
        SearchPredicate::PrefixMatch(code) => {
            let pattern = format!("{}%", escape_like(code));
            qb.push(" AND (t.kode_tender LIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR COALESCE(t.kode_rup, '') LIKE ");
            qb.push_bind(pattern);
            qb.push(")");
        }
        SearchPredicate::TokenMatch(tokens) => {
            for token in tokens {
                let pattern = format!("%{}%", escape_like(token));
                qb.push(" AND (t.kode_tender LIKE ");
                qb.push_bind(pattern.clone());
                qb.push(" OR COALESCE(t.kode_rup, '') LIKE ");
                qb.push_bind(pattern.clone());
                qb.push(" OR t.nama_tender ILIKE ");
                qb.push_bind(pattern.clone());
                qb.push(" OR l.nama_lpse ILIKE ");
                qb.push_bind(pattern);
                qb.push(")");
            }
        }
        SearchPredicate::FullText(phrase) => {
            qb.push(
                " AND (to_tsvector('simple', coalesce(t.nama_tender, '') || ' ' || coalesce(l.nama_lpse, '')) \
                 @@ websearch_to_tsquery('simple', ",
            );
            qb.push_bind(phrase.clone());
            qb.push(")");
            for fragment in code_fragments(phrase) {
                let pattern = format!("%{}%", escape_like(&fragment));
                qb.push(" OR t.kode_tender LIKE ");
                qb.push_bind(pattern.clone());
                qb.push(" OR COALESCE(t.kode_rup, '') LIKE ");
                qb.push_bind(pattern);
            }
            qb.push(")");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql_for(predicate: &TenderPredicate) -> String {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*)");
        qb.push(TENDER_FROM);
        push_predicate(&mut qb, predicate);
        qb.sql().to_string()
    }

    #[test]
    fn unset_filters_add_no_clauses() {
        assert_eq!(
            sql_for(&TenderPredicate::default()),
            "SELECT COUNT(*) FROM tenders t JOIN lpse l ON l.id = t.lpse_id WHERE 1=1"
        );
    }

    #[test]
    fn prefix_search_binds_both_codes() {
        let sql = sql_for(&TenderPredicate {
            search: Some(SearchPredicate::PrefixMatch("1234".into())),
            ..Default::default()
        });
        assert!(sql.ends_with(" AND (t.kode_tender LIKE $1 OR COALESCE(t.kode_rup, '') LIKE $2)"));
    }

    #[test]
    fn every_token_adds_one_group() {
        let sql = sql_for(&TenderPredicate {
            search: Some(SearchPredicate::TokenMatch(vec!["jalan".into(), "tol".into()])),
            ..Default::default()
        });
        assert_eq!(sql.matches("t.nama_tender ILIKE").count(), 2);
        assert!(sql.contains("l.nama_lpse ILIKE $8"));
    }

    #[test]
    fn full_text_search_ors_numeric_fragments() {
        let sql = sql_for(&TenderPredicate {
            search: Some(SearchPredicate::FullText("paket 2024".into())),
            ..Default::default()
        });
        assert!(sql.contains("websearch_to_tsquery('simple', $1) OR t.kode_tender LIKE $2"));
        assert!(sql.ends_with("LIKE $3)"));
    }

    #[test]
    fn filters_are_anded_in_order() {
        let sql = sql_for(&TenderPredicate {
            category: Some("konstruksi".into()),
            status: Some("Aktif".into()),
            min_value: Some(10.0),
            max_value: Some(20.0),
            source_id: Some(3),
            fiscal_year: Some(2024),
            ..Default::default()
        });
        assert!(sql.contains(" AND t.kategori_pekerjaan ILIKE $1"));
        assert!(sql.contains(" AND LOWER(t.status_tender) = LOWER($2)"));
        assert!(sql.contains(" AND t.lpse_id = $3"));
        assert!(sql.contains(" AND t.tahun_anggaran = $4"));
        assert!(sql.contains(" AND t.nilai_pagu >= $5::numeric"));
        assert!(sql.ends_with(" AND t.nilai_pagu <= $6::numeric"));
    }
}
