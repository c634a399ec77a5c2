use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::application::pagination::PageRequest;
use crate::application::repos::{RepoError, TenderPage, TendersRepo};
use crate::application::search::{SearchPredicate, TenderPredicate};
use crate::domain::entities::{
    AuthorityRecord, GroupCount, TableCounts, TenderDetail, TenderRecord, TenderRequirements,
    TenderStats, TenderSuggestion,
};
use crate::domain::types::TenderCode;

use super::util::convert_count;
use super::{PostgresRepositories, TENDER_FROM, map_sqlx_error, push_predicate, push_search};

const TENDER_COLUMNS: &str = "SELECT t.id, t.kode_tender, t.kode_rup, t.nama_tender, t.lpse_id, \
     t.kategori_pekerjaan, t.status_tender, t.tahap_saat_ini, \
     t.nilai_pagu::float8 AS nilai_pagu, t.nilai_hps::float8 AS nilai_hps, \
     t.tahun_anggaran, t.url_detail, t.created_at, t.updated_at, \
     l.kode_lpse, l.nama_lpse, l.provinsi, l.kota, l.total_tenders::int8 AS lpse_total_tenders";

const STATS_CATEGORY_LIMIT: i64 = 10;

#[derive(sqlx::FromRow)]
struct TenderRow {
    id: i64,
    kode_tender: String,
    kode_rup: Option<String>,
    nama_tender: String,
    lpse_id: i64,
    kategori_pekerjaan: Option<String>,
    status_tender: Option<String>,
    tahap_saat_ini: Option<String>,
    nilai_pagu: Option<f64>,
    nilai_hps: Option<f64>,
    tahun_anggaran: Option<i32>,
    url_detail: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    kode_lpse: Option<String>,
    nama_lpse: String,
    provinsi: Option<String>,
    kota: Option<String>,
    lpse_total_tenders: i64,
}

impl From<TenderRow> for TenderRecord {
    fn from(row: TenderRow) -> Self {
        Self {
            id: row.id,
            code: row.kode_tender,
            rup_code: row.kode_rup,
            name: row.nama_tender,
            authority_id: row.lpse_id,
            category: row.kategori_pekerjaan,
            status: row.status_tender,
            stage: row.tahap_saat_ini,
            budget_value: row.nilai_pagu,
            estimate_value: row.nilai_hps,
            fiscal_year: row.tahun_anggaran,
            detail_url: row.url_detail,
            created_at: row.created_at,
            updated_at: row.updated_at,
            authority: AuthorityRecord {
                id: row.lpse_id,
                code: row.kode_lpse,
                name: row.nama_lpse,
                province: row.provinsi,
                city: row.kota,
                total_tenders: row.lpse_total_tenders,
            },
        }
    }
}

#[derive(sqlx::FromRow)]
struct TenderDetailRow {
    #[sqlx(flatten)]
    tender: TenderRow,
    has_details: bool,
    persyaratan_umum: Option<Value>,
    persyaratan_teknis: Option<Value>,
    persyaratan_kualifikasi: Option<Value>,
    dokumen_pengadaan: Option<Value>,
}

impl From<TenderDetailRow> for TenderDetail {
    fn from(row: TenderDetailRow) -> Self {
        let requirements = row.has_details.then(|| {
            TenderRequirements {
                general: row.persyaratan_umum,
                technical: row.persyaratan_teknis,
                qualification: row.persyaratan_kualifikasi,
                procurement_documents: row.dokumen_pengadaan,
            }
            .normalized()
        });
        Self {
            tender: row.tender.into(),
            requirements,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AuthorityRow {
    id: i64,
    kode_lpse: Option<String>,
    nama_lpse: String,
    provinsi: Option<String>,
    kota: Option<String>,
    total_tenders: i64,
}

impl From<AuthorityRow> for AuthorityRecord {
    fn from(row: AuthorityRow) -> Self {
        Self {
            id: row.id,
            code: row.kode_lpse,
            name: row.nama_lpse,
            province: row.provinsi,
            city: row.kota,
            total_tenders: row.total_tenders,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SuggestionRow {
    id: i64,
    kode_tender: String,
    nama_tender: String,
    kategori_pekerjaan: Option<String>,
    status_tender: Option<String>,
    nama_lpse: Option<String>,
    nilai_pagu: Option<f64>,
}

impl From<SuggestionRow> for TenderSuggestion {
    fn from(row: SuggestionRow) -> Self {
        Self {
            id: row.id,
            code: row.kode_tender,
            name: row.nama_tender,
            category: row.kategori_pekerjaan,
            status: row.status_tender,
            authority_name: row.nama_lpse,
            budget_value: row.nilai_pagu,
        }
    }
}

#[derive(sqlx::FromRow)]
struct GroupRow {
    label: String,
    count: i64,
}

impl From<GroupRow> for GroupCount {
    fn from(row: GroupRow) -> Self {
        Self {
            label: row.label,
            count: row.count,
        }
    }
}

impl PostgresRepositories {
    async fn group_counts(
        &self,
        sql: &str,
        limit: Option<i64>,
    ) -> Result<Vec<GroupCount>, RepoError> {
        let mut query = sqlx::query_as::<_, GroupRow>(sql);
        if let Some(limit) = limit {
            query = query.bind(limit);
        }
        let rows = query
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(GroupCount::from).collect())
    }

    async fn recent_tenders(&self, limit: i64) -> Result<Vec<TenderRecord>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new(TENDER_COLUMNS);
        qb.push(TENDER_FROM);
        qb.push(" ORDER BY t.created_at DESC, t.id DESC LIMIT ");
        qb.push_bind(limit);
        let rows = qb
            .build_query_as::<TenderRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(TenderRecord::from).collect())
    }

    async fn scalar_count(&self, sql: &str) -> Result<i64, RepoError> {
        sqlx::query_scalar::<_, i64>(sql)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl TendersRepo for PostgresRepositories {
    async fn list_tenders(
        &self,
        predicate: &TenderPredicate,
        page: PageRequest,
    ) -> Result<TenderPage, RepoError> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*)");
        count_qb.push(TENDER_FROM);
        push_predicate(&mut count_qb, predicate);

        let mut rows_qb = QueryBuilder::<Postgres>::new(TENDER_COLUMNS);
        rows_qb.push(TENDER_FROM);
        push_predicate(&mut rows_qb, predicate);
        rows_qb.push(" ORDER BY t.created_at DESC, t.id DESC LIMIT ");
        rows_qb.push_bind(i64::from(page.limit));
        rows_qb.push(" OFFSET ");
        rows_qb.push_bind(i64::try_from(page.skip()).unwrap_or(i64::MAX));

        let (total, rows) = tokio::try_join!(
            async {
                count_qb
                    .build_query_scalar::<i64>()
                    .fetch_one(self.pool())
                    .await
                    .map_err(map_sqlx_error)
            },
            async {
                rows_qb
                    .build_query_as::<TenderRow>()
                    .fetch_all(self.pool())
                    .await
                    .map_err(map_sqlx_error)
            },
        )?;

        Ok(TenderPage {
            total: convert_count(total)?,
            rows: rows.into_iter().map(TenderRecord::from).collect(),
        })
    }

    async fn find_tender(&self, code: &TenderCode) -> Result<Option<TenderDetail>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new(TENDER_COLUMNS);
        qb.push(
            ", (d.tender_id IS NOT NULL) AS has_details, d.persyaratan_umum, d.persyaratan_teknis, \
             d.persyaratan_kualifikasi, d.dokumen_pengadaan \
             FROM tenders t JOIN lpse l ON l.id = t.lpse_id \
             LEFT JOIN tender_details d ON d.tender_id = t.id \
             WHERE t.kode_tender = ",
        );
        qb.push_bind(code.as_str().to_string());

        let row = qb
            .build_query_as::<TenderDetailRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(TenderDetail::from))
    }

    async fn suggest_tenders(
        &self,
        predicate: &SearchPredicate,
        limit: u32,
    ) -> Result<Vec<TenderSuggestion>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT t.id, t.kode_tender, t.nama_tender, t.kategori_pekerjaan, t.status_tender, \
             l.nama_lpse, t.nilai_pagu::float8 AS nilai_pagu",
        );
        qb.push(TENDER_FROM);
        push_search(&mut qb, predicate);
        qb.push(" ORDER BY t.created_at DESC, t.id DESC LIMIT ");
        qb.push_bind(i64::from(limit));

        let rows = qb
            .build_query_as::<SuggestionRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(TenderSuggestion::from).collect())
    }

    async fn tender_stats(&self, recent: u32) -> Result<TenderStats, RepoError> {
        let (
            total_tenders,
            total_authorities,
            average_budget,
            by_category,
            by_status,
            by_province,
            recent_tenders,
        ) = tokio::try_join!(
            self.scalar_count("SELECT COUNT(*) FROM tenders"),
            self.scalar_count("SELECT COUNT(*) FROM lpse"),
            async {
                sqlx::query_scalar::<_, Option<f64>>("SELECT AVG(nilai_pagu)::float8 FROM tenders")
                    .fetch_one(self.pool())
                    .await
                    .map_err(map_sqlx_error)
            },
            self.group_counts(
                "SELECT kategori_pekerjaan AS label, COUNT(*)::int8 AS count FROM tenders \
                 WHERE kategori_pekerjaan IS NOT NULL \
                 GROUP BY kategori_pekerjaan ORDER BY count DESC, label LIMIT $1",
                Some(STATS_CATEGORY_LIMIT),
            ),
            self.group_counts(
                "SELECT status_tender AS label, COUNT(*)::int8 AS count FROM tenders \
                 WHERE status_tender IS NOT NULL \
                 GROUP BY status_tender ORDER BY count DESC, label",
                None,
            ),
            self.group_counts(
                "SELECT provinsi AS label, COALESCE(SUM(total_tenders), 0)::int8 AS count FROM lpse \
                 WHERE provinsi IS NOT NULL \
                 GROUP BY provinsi ORDER BY count DESC, label",
                None,
            ),
            self.recent_tenders(i64::from(recent)),
        )?;

        Ok(TenderStats {
            total_tenders,
            total_authorities,
            average_budget: average_budget.unwrap_or(0.0),
            by_category,
            by_status,
            by_province,
            recent_tenders,
        })
    }

    async fn list_authorities(&self) -> Result<Vec<AuthorityRecord>, RepoError> {
        let rows = sqlx::query_as::<_, AuthorityRow>(
            "SELECT id, kode_lpse, nama_lpse, provinsi, kota, total_tenders::int8 AS total_tenders \
             FROM lpse ORDER BY nama_lpse ASC",
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(AuthorityRecord::from).collect())
    }

    async fn table_counts(&self) -> Result<TableCounts, RepoError> {
        let (tenders, authorities) = tokio::try_join!(
            self.scalar_count("SELECT COUNT(*) FROM tenders"),
            self.scalar_count("SELECT COUNT(*) FROM lpse"),
        )?;
        Ok(TableCounts {
            tenders,
            authorities,
        })
    }

    async fn ping(&self) -> Result<(), RepoError> {
        self.health_check().await.map_err(map_sqlx_error)
    }
}
