// Live MariaDB integration tests
//
// These exercise the sqlx-backed store against a real server and are
// ignored by default.
//
// Run with:
//   cargo test --test mariadb_integration_test -- --ignored
//
// Requires MariaDB running at mysql://root:@127.0.0.1/test_index_advisor

use serial_test::serial;
use sqlx::mysql::MySqlPoolOptions;

use sqlx_index_advisor::{
    ingest_chunk, IndexIntrospector, IngestOptions, MariaDbStore, PlanExecutor, QueryLogEntry,
    Table, TableIndexAdvisor, TableNameCache, WorkloadStore,
};

const DATABASE_URL: &str = "mysql://root:@127.0.0.1/test_index_advisor";

async fn store() -> MariaDbStore {
    let pool = MySqlPoolOptions::new()
        .max_connections(2)
        .connect(DATABASE_URL)
        .await
        .expect("MariaDB must be running for ignored integration tests");
    let store = MariaDbStore::new(pool);
    store.warn_if_not_mariadb().await.expect("version check");
    store.ensure_schema().await.expect("schema bootstrap");
    store
}

async fn recreate_note_table(store: &MariaDbStore) {
    sqlx::query("DROP TABLE IF EXISTS tabNote")
        .execute(store.pool())
        .await
        .unwrap();
    sqlx::query(
        "CREATE TABLE tabNote (
             id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
             owner VARCHAR(140) NOT NULL,
             idx INT NOT NULL,
             modified DATETIME NULL,
             creation DATETIME NULL
         )",
    )
    .execute(store.pool())
    .await
    .unwrap();
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_explain_returns_one_row_per_row_source() {
    let store = store().await;
    recreate_note_table(&store).await;

    let plan = store
        .explain("SELECT owner FROM tabNote WHERE owner = 'x'")
        .await
        .unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].table.as_deref(), Some("tabNote"));
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_list_indexes_reflects_composite_definitions() {
    let store = store().await;
    recreate_note_table(&store).await;
    sqlx::query("CREATE INDEX ix_owner_idx ON tabNote (owner, idx)")
        .execute(store.pool())
        .await
        .unwrap();

    let indexes = store.list_indexes("tabNote").await.unwrap();
    assert!(indexes
        .iter()
        .any(|sequence| sequence == &["owner".to_string(), "idx".to_string()]));
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_record_table_is_idempotent_and_cached() {
    let store = store().await;
    let cache = TableNameCache::new();

    let first = store.record_table("tabNote").await.unwrap();
    let second = store.record_table("tabNote").await.unwrap();
    assert_eq!(first, second);

    let table = Table::load(first, &store, &cache).await.unwrap();
    assert_eq!(table.name(), "tabNote");
    assert_eq!(cache.id_of(&store, "tabNote").await.unwrap(), Some(first));
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_ingest_records_and_skips() {
    let store = store().await;
    recreate_note_table(&store).await;

    let entries = vec![
        QueryLogEntry {
            query: "SELECT owner FROM tabNote WHERE owner = 'x'".to_string(),
            parameterized: Some("SELECT owner FROM tabNote WHERE owner = %s".to_string()),
            call_stack: None,
        },
        QueryLogEntry {
            query: "SHOW TABLES".to_string(),
            parameterized: None,
            call_stack: None,
        },
    ];
    let report = ingest_chunk(&store, &entries, &IngestOptions::default())
        .await
        .unwrap();
    assert_eq!(report.recorded, 1);
    assert_eq!(report.skipped, 1);
    assert!(!report.aborted);

    // ingesting the same statement again bumps the occurrence counter
    let report = ingest_chunk(
        &store,
        &entries[..1],
        &IngestOptions {
            record_state: false,
            ..IngestOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(report.recorded, 1);

    let occurrence: u64 = sqlx::query_scalar(
        "SELECT occurrence FROM observed_query
         WHERE query_text = 'SELECT owner FROM tabNote WHERE owner = \\'x\\''",
    )
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(occurrence, 2);
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_qualification_against_live_indexes() {
    let store = store().await;
    recreate_note_table(&store).await;
    sqlx::query("CREATE INDEX ix_owner_idx ON tabNote (owner, idx)")
        .execute(store.pool())
        .await
        .unwrap();

    let table = Table::new(store.record_table("tabNote").await.unwrap(), "tabNote");
    let statements = vec![
        sqlx_index_advisor::StatementView::new(
            "select `id` from `tabNote` where `owner` = 'a' and `idx` > 1",
        ),
        sqlx_index_advisor::StatementView::new(
            "select `id` from `tabNote` where `modified` = `creation`",
        ),
    ];
    let advisor = TableIndexAdvisor::new(&table);
    let candidates = advisor.find_index_candidates(&statements);
    let qualified = advisor.qualify(candidates, &store).await.unwrap();

    // (owner, idx) exists; (modified, creation) does not
    assert_eq!(qualified.len(), 1);
    assert_eq!(qualified[0].columns(), &["modified", "creation"]);

    store
        .record_candidate(table.id(), &qualified[0])
        .await
        .unwrap();
    let recorded: String = sqlx::query_scalar(
        "SELECT columns_csv FROM derived_index WHERE table_id = ? LIMIT 1",
    )
    .bind(table.id())
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(recorded, "modified,creation");
}
