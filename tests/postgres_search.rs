use std::collections::HashSet;

use sqlx::PgPool;
use tenderscope::application::filters::CanonicalFilterSet;
use tenderscope::application::pagination::PageRequest;
use tenderscope::application::repos::TendersRepo;
use tenderscope::application::search::{SearchMode, TenderPredicate, suggestion_predicate};
use tenderscope::domain::types::TenderCode;
use tenderscope::infra::db::PostgresRepositories;

async fn seed(pool: &PgPool) {
    sqlx::query(
        "INSERT INTO lpse (id, kode_lpse, nama_lpse, provinsi, kota, total_tenders) VALUES \
         (1, 'BDG', 'LPSE Kota Bandung', 'Jawa Barat', 'Bandung', 12), \
         (2, 'SBY', 'LPSE Kota Surabaya', 'Jawa Timur', 'Surabaya', 8)",
    )
    .execute(pool)
    .await
    .expect("seed lpse");

    for n in 1..=25_i64 {
        let name = if n % 2 == 0 {
            format!("Pembangunan Jalan Tol Seksi {n}")
        } else {
            format!("Pengadaan Alat Kesehatan Paket {n}")
        };
        let category = if n % 3 == 0 {
            Some("Pengadaan Barang")
        } else {
            Some("Pekerjaan Konstruksi")
        };
        sqlx::query(
            "INSERT INTO tenders (kode_tender, kode_rup, nama_tender, lpse_id, kategori_pekerjaan, \
             status_tender, nilai_pagu, tahun_anggaran, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7::numeric, $8, \
             TIMESTAMPTZ '2024-01-01 00:00:00+00' + make_interval(hours => $9), \
             TIMESTAMPTZ '2024-01-01 00:00:00+00' + make_interval(hours => $9))",
        )
        .bind(format!("{}", 10_000 + n))
        .bind(format!("{}", 50_000 + n))
        .bind(name)
        .bind(if n <= 15 { 1_i64 } else { 2_i64 })
        .bind(category)
        .bind(if n % 5 == 0 { "Selesai" } else { "Aktif" })
        .bind(1_000_000.0 * n as f64)
        .bind(if n % 2 == 0 { 2024_i32 } else { 2023_i32 })
        .bind(n as i32)
        .execute(pool)
        .await
        .expect("seed tender");
    }

    sqlx::query(
        "INSERT INTO tender_details (tender_id, persyaratan_umum, persyaratan_teknis) \
         SELECT id, '\"  \"'::jsonb, '[\"SIUP\"]'::jsonb FROM tenders WHERE kode_tender = '10002'",
    )
    .execute(pool)
    .await
    .expect("seed details");
}

fn predicate(filters: CanonicalFilterSet, mode: SearchMode) -> TenderPredicate {
    TenderPredicate::resolve(&filters, mode)
}

#[sqlx::test(migrations = "./migrations")]
async fn first_page_matches_count_and_order(pool: PgPool) {
    seed(&pool).await;
    let repo = PostgresRepositories::new(pool);

    let page = repo
        .list_tenders(&TenderPredicate::default(), PageRequest::new(1, 10))
        .await
        .expect("list tenders");
    assert_eq!(page.total, 25);
    assert_eq!(page.rows.len(), 10);
    let codes: Vec<&str> = page.rows.iter().map(|row| row.code.as_str()).collect();
    assert_eq!(codes[0], "10025");
    assert_eq!(codes[9], "10016");
    assert_eq!(page.rows[0].authority.name, "LPSE Kota Surabaya");

    let last = repo
        .list_tenders(&TenderPredicate::default(), PageRequest::new(3, 10))
        .await
        .expect("last page");
    assert_eq!(last.rows.len(), 5);
}

#[sqlx::test(migrations = "./migrations")]
async fn code_prefix_search_uses_both_codes(pool: PgPool) {
    seed(&pool).await;
    let repo = PostgresRepositories::new(pool);

    let by_code = predicate(
        CanonicalFilterSet {
            search: Some("1002".into()),
            ..Default::default()
        },
        SearchMode::Contains,
    );
    let page = repo
        .list_tenders(&by_code, PageRequest::default())
        .await
        .expect("prefix search");
    assert_eq!(page.total, 6);

    let by_rup = predicate(
        CanonicalFilterSet {
            search: Some("50011".into()),
            ..Default::default()
        },
        SearchMode::Contains,
    );
    let page = repo
        .list_tenders(&by_rup, PageRequest::default())
        .await
        .expect("rup search");
    assert_eq!(page.total, 1);
    assert_eq!(page.rows[0].code, "10011");
}

#[sqlx::test(migrations = "./migrations")]
async fn token_search_and_filters_share_one_predicate(pool: PgPool) {
    seed(&pool).await;
    let repo = PostgresRepositories::new(pool);

    let filtered = predicate(
        CanonicalFilterSet {
            search: Some("JALAN surabaya".into()),
            status: Some("aktif".into()),
            min_value: Some(20_000_000.0),
            max_value: Some(16_000_000.0),
            ..Default::default()
        },
        SearchMode::Contains,
    );
    let page = repo
        .list_tenders(&filtered, PageRequest::new(1, 2))
        .await
        .expect("filtered search");

    // Even codes 16..=20 at Surabaya, excluding status Selesai (20).
    assert_eq!(page.total, 2);
    let codes: HashSet<&str> = page.rows.iter().map(|row| row.code.as_str()).collect();
    assert_eq!(codes, HashSet::from(["10016", "10018"]));
}

#[sqlx::test(migrations = "./migrations")]
async fn full_text_mode_keeps_numeric_fragments(pool: PgPool) {
    seed(&pool).await;
    let repo = PostgresRepositories::new(pool);

    let fts = predicate(
        CanonicalFilterSet {
            search: Some("kesehatan".into()),
            ..Default::default()
        },
        SearchMode::FullText,
    );
    let page = repo
        .list_tenders(&fts, PageRequest::new(1, 100))
        .await
        .expect("fts search");
    assert_eq!(page.total, 13);

    let mixed = predicate(
        CanonicalFilterSet {
            search: Some("paket 10004".into()),
            ..Default::default()
        },
        SearchMode::FullText,
    );
    let page = repo
        .list_tenders(&mixed, PageRequest::new(1, 100))
        .await
        .expect("mixed search");
    assert!(page.rows.iter().any(|row| row.code == "10004"));
}

#[sqlx::test(migrations = "./migrations")]
async fn detail_normalizes_requirements(pool: PgPool) {
    seed(&pool).await;
    let repo = PostgresRepositories::new(pool);

    let code = TenderCode::parse("10002").expect("valid code");
    let detail = repo
        .find_tender(&code)
        .await
        .expect("find tender")
        .expect("tender exists");
    let requirements = detail.requirements.expect("requirements present");
    assert_eq!(requirements.general, None);
    assert_eq!(requirements.technical, Some(serde_json::json!(["SIUP"])));
    assert_eq!(detail.tender.budget_value, Some(2_000_000.0));

    let plain = TenderCode::parse("10003").expect("valid code");
    let detail = repo
        .find_tender(&plain)
        .await
        .expect("find tender")
        .expect("tender exists");
    assert!(detail.requirements.is_none());

    let missing = TenderCode::parse("99999").expect("valid code");
    assert!(repo.find_tender(&missing).await.expect("lookup").is_none());
}

#[sqlx::test(migrations = "./migrations")]
async fn stats_group_and_sum(pool: PgPool) {
    seed(&pool).await;
    let repo = PostgresRepositories::new(pool);

    let stats = repo.tender_stats(5).await.expect("stats");
    assert_eq!(stats.total_tenders, 25);
    assert_eq!(stats.total_authorities, 2);
    assert!((stats.average_budget - 13_000_000.0).abs() < 0.01);
    assert_eq!(stats.by_category[0].label, "Pekerjaan Konstruksi");
    assert_eq!(stats.by_category[0].count, 17);
    assert_eq!(stats.by_status[0].label, "Aktif");
    assert_eq!(stats.by_status[0].count, 20);
    assert_eq!(stats.by_province[0].label, "Jawa Barat");
    assert_eq!(stats.by_province[0].count, 12);
    assert_eq!(stats.recent_tenders.len(), 5);
    assert_eq!(stats.recent_tenders[0].code, "10025");
}

#[sqlx::test(migrations = "./migrations")]
async fn suggestions_and_directory(pool: PgPool) {
    seed(&pool).await;
    let repo = PostgresRepositories::new(pool);

    let predicate = suggestion_predicate("jalan tol").expect("usable query");
    let rows = repo.suggest_tenders(&predicate, 10).await.expect("suggest");
    assert_eq!(rows.len(), 10);
    assert_eq!(rows[0].code, "10024");
    assert_eq!(rows[0].authority_name.as_deref(), Some("LPSE Kota Surabaya"));

    let authorities = repo.list_authorities().await.expect("authorities");
    let names: Vec<&str> = authorities.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, ["LPSE Kota Bandung", "LPSE Kota Surabaya"]);

    let counts = repo.table_counts().await.expect("counts");
    assert_eq!((counts.tenders, counts.authorities), (25, 2));
    repo.ping().await.expect("ping");
}
