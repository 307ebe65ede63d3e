// Workload store - the database-facing collaborator contracts
//
// The analyzer and benchmark only ever see the three traits below, so tests
// drive them with canned implementations. MariaDbStore is the live
// implementation over a sqlx MySQL pool: EXPLAIN for plans,
// information_schema for index metadata, and a few small bookkeeping tables
// for the observed workload itself.

use sqlx::mysql::MySqlRow;
use sqlx::{MySql, MySqlPool, Row as _, Transaction};

use crate::advisor::candidate::IndexCandidate;
use crate::AdvisorError;

/// One row source of a plan report.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRow {
    /// Row-source table, when the planner names one.
    pub table: Option<String>,
    /// Rows the planner expects to examine.
    pub rows_examined: u64,
    /// Selectivity percentage; 100 means every examined row qualifies.
    pub rows_filtered: f64,
    /// Planner diagnostics ("Using where", "Using index", ...).
    pub extra: String,
}

/// Plan execution: structural cost report for a statement, one entry per
/// row source, without executing the statement for effect.
pub trait PlanExecutor {
    async fn explain(&self, sql: &str) -> Result<Vec<PlanRow>, AdvisorError>;
}

/// Index introspection: existing indexes reduced to their defining column
/// order.
pub trait IndexIntrospector {
    async fn list_indexes(&self, table_name: &str) -> Result<Vec<Vec<String>>, AdvisorError>;
}

/// Identity and recording of observed tables.
pub trait WorkloadStore {
    async fn table_exists(&self, name: &str) -> Result<bool, AdvisorError>;
    async fn resolve_table_id(&self, name: &str) -> Result<Option<u64>, AdvisorError>;
    async fn resolve_table_name(&self, id: u64) -> Result<Option<String>, AdvisorError>;
    /// Record a table, returning the existing id when already known.
    async fn record_table(&self, name: &str) -> Result<u64, AdvisorError>;
    /// Snapshot every table of the connected schema into the store.
    /// Returns how many previously-unseen tables were recorded.
    async fn record_database_state(&self) -> Result<usize, AdvisorError>;
}

/// Bookkeeping tables owned by this crate. Plan rows landing on these are
/// our own instrumentation, not workload, and are never recorded.
pub const INTERNAL_TABLES: [&str; 4] = [
    "observed_table",
    "observed_query",
    "observed_plan_row",
    "derived_index",
];

/// Live store over a MariaDB/MySQL pool.
pub struct MariaDbStore {
    pool: MySqlPool,
}

impl MariaDbStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Create the bookkeeping tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), AdvisorError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS observed_table (
                id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
                table_name VARCHAR(255) NOT NULL,
                UNIQUE KEY uq_observed_table_name (table_name)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS observed_query (
                id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
                query_text TEXT NOT NULL,
                parameterized_text TEXT NULL,
                call_stack TEXT NULL,
                occurrence BIGINT UNSIGNED NOT NULL DEFAULT 1,
                UNIQUE KEY uq_observed_query_text (query_text(512))
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS observed_plan_row (
                id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
                query_id BIGINT UNSIGNED NOT NULL,
                row_order INT NOT NULL,
                table_name VARCHAR(255) NULL,
                rows_examined BIGINT UNSIGNED NOT NULL,
                rows_filtered DOUBLE NOT NULL,
                extra TEXT NOT NULL,
                KEY ix_observed_plan_row_query (query_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS derived_index (
                id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
                table_id BIGINT UNSIGNED NOT NULL,
                columns_csv VARCHAR(1024) NOT NULL,
                provenance VARCHAR(20) NOT NULL,
                UNIQUE KEY uq_derived_index (table_id, columns_csv)
            )
            "#,
        ];
        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Warn when the connected server does not identify as MariaDB; the
    /// EXPLAIN metrics this crate reads are MariaDB-shaped.
    pub async fn warn_if_not_mariadb(&self) -> Result<(), AdvisorError> {
        let version: String = sqlx::query_scalar("SELECT VERSION()")
            .fetch_one(&self.pool)
            .await?;
        if !version.to_lowercase().contains("mariadb") {
            eprintln!(
                "WARN: This tool might not be compatible with server version {}",
                version
            );
        }
        Ok(())
    }

    /// Upsert one observed statement by its normalized text, bumping the
    /// occurrence counter, and replace its recorded plan rows. Runs inside
    /// the caller's transaction so ingestion can commit in chunks.
    pub async fn record_statement(
        &self,
        tx: &mut Transaction<'_, MySql>,
        normalized: &str,
        parameterized: Option<&str>,
        call_stack: Option<&serde_json::Value>,
        plan: &[PlanRow],
    ) -> Result<u64, AdvisorError> {
        sqlx::query(
            "INSERT INTO observed_query (query_text, parameterized_text, call_stack, occurrence)
             VALUES (?, ?, ?, 1)
             ON DUPLICATE KEY UPDATE
                 id = LAST_INSERT_ID(id),
                 occurrence = occurrence + 1,
                 parameterized_text = VALUES(parameterized_text),
                 call_stack = COALESCE(VALUES(call_stack), call_stack)",
        )
        .bind(normalized)
        .bind(parameterized)
        .bind(call_stack.map(|stack| stack.to_string()))
        .execute(&mut **tx)
        .await?;

        let query_id: u64 = sqlx::query_scalar("SELECT LAST_INSERT_ID()")
            .fetch_one(&mut **tx)
            .await?;

        sqlx::query("DELETE FROM observed_plan_row WHERE query_id = ?")
            .bind(query_id)
            .execute(&mut **tx)
            .await?;

        for (order, row) in plan
            .iter()
            .filter(|row| !is_internal_table(row.table.as_deref()))
            .enumerate()
        {
            sqlx::query(
                "INSERT INTO observed_plan_row
                     (query_id, row_order, table_name, rows_examined, rows_filtered, extra)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(query_id)
            .bind(order as i32)
            .bind(row.table.as_deref())
            .bind(row.rows_examined)
            .bind(row.rows_filtered)
            .bind(&row.extra)
            .execute(&mut **tx)
            .await?;
        }

        Ok(query_id)
    }

    /// Record a qualified candidate as a derived index definition.
    pub async fn record_candidate(
        &self,
        table_id: u64,
        candidate: &IndexCandidate<'_>,
    ) -> Result<(), AdvisorError> {
        let provenance = match candidate.provenance() {
            crate::advisor::candidate::Provenance::FilterDerived => "filter",
            crate::advisor::candidate::Provenance::ProjectionDerived => "projection",
        };
        sqlx::query(
            "INSERT INTO derived_index (table_id, columns_csv, provenance)
             VALUES (?, ?, ?)
             ON DUPLICATE KEY UPDATE provenance = VALUES(provenance)",
        )
        .bind(table_id)
        .bind(candidate.columns().join(","))
        .bind(provenance)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn is_internal_table(table: Option<&str>) -> bool {
    match table {
        Some(name) => INTERNAL_TABLES.contains(&name),
        None => false,
    }
}

fn plan_row_from(row: &MySqlRow) -> PlanRow {
    // EXPLAIN column types differ across MariaDB/MySQL versions; decode
    // tolerantly and fall back to the neutral values.
    let rows_examined = row
        .try_get::<u64, _>("rows")
        .or_else(|_| row.try_get::<i64, _>("rows").map(|v| v.max(0) as u64))
        .unwrap_or(0);
    let rows_filtered = row
        .try_get::<f64, _>("filtered")
        .or_else(|_| row.try_get::<f32, _>("filtered").map(f64::from))
        .unwrap_or(100.0);
    PlanRow {
        table: row.try_get::<Option<String>, _>("table").ok().flatten(),
        rows_examined,
        rows_filtered,
        extra: row
            .try_get::<Option<String>, _>("Extra")
            .ok()
            .flatten()
            .unwrap_or_default(),
    }
}

impl PlanExecutor for MariaDbStore {
    async fn explain(&self, sql: &str) -> Result<Vec<PlanRow>, AdvisorError> {
        let rows = sqlx::query(&format!("EXPLAIN EXTENDED {}", sql))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(plan_row_from).collect())
    }
}

impl IndexIntrospector for MariaDbStore {
    async fn list_indexes(&self, table_name: &str) -> Result<Vec<Vec<String>>, AdvisorError> {
        let rows = sqlx::query(
            "SELECT index_name, column_name
             FROM information_schema.statistics
             WHERE table_schema = DATABASE() AND table_name = ?
             ORDER BY index_name, seq_in_index",
        )
        .bind(table_name)
        .fetch_all(&self.pool)
        .await?;

        let pairs = rows
            .iter()
            .map(|row| {
                (
                    row.try_get::<String, _>("index_name").unwrap_or_default(),
                    row.try_get::<String, _>("column_name").unwrap_or_default(),
                )
            })
            .collect();
        Ok(group_index_columns(pairs))
    }
}

/// Collapse (index_name, column_name) rows, already ordered by name and
/// position, into one column sequence per index.
pub(crate) fn group_index_columns(pairs: Vec<(String, String)>) -> Vec<Vec<String>> {
    let mut sequences: Vec<Vec<String>> = Vec::new();
    let mut current: Option<(String, Vec<String>)> = None;
    for (index_name, column_name) in pairs {
        match &mut current {
            Some((name, columns)) if *name == index_name => columns.push(column_name),
            _ => {
                if let Some((_, columns)) = current.take() {
                    sequences.push(columns);
                }
                current = Some((index_name, vec![column_name]));
            }
        }
    }
    if let Some((_, columns)) = current {
        sequences.push(columns);
    }
    sequences
}

impl WorkloadStore for MariaDbStore {
    async fn table_exists(&self, name: &str) -> Result<bool, AdvisorError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM observed_table WHERE table_name = ?")
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn resolve_table_id(&self, name: &str) -> Result<Option<u64>, AdvisorError> {
        let id = sqlx::query_scalar::<_, u64>(
            "SELECT id FROM observed_table WHERE table_name = ? LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn resolve_table_name(&self, id: u64) -> Result<Option<String>, AdvisorError> {
        let name = sqlx::query_scalar::<_, String>(
            "SELECT table_name FROM observed_table WHERE id = ? LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(name)
    }

    async fn record_table(&self, name: &str) -> Result<u64, AdvisorError> {
        if let Some(id) = self.resolve_table_id(name).await? {
            return Ok(id);
        }
        sqlx::query(
            "INSERT INTO observed_table (table_name) VALUES (?)
             ON DUPLICATE KEY UPDATE id = LAST_INSERT_ID(id)",
        )
        .bind(name)
        .execute(&self.pool)
        .await?;
        let id: u64 = sqlx::query_scalar("SELECT LAST_INSERT_ID()")
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn record_database_state(&self) -> Result<usize, AdvisorError> {
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT table_name FROM information_schema.tables
             WHERE table_schema = DATABASE() ORDER BY table_name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut recorded = 0;
        for table in tables {
            if !self.table_exists(&table).await? {
                self.record_table(&table).await?;
                recorded += 1;
            }
        }
        Ok(recorded)
    }
}
