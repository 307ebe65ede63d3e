// Chunked workload ingestion
//
// Consumes captured query-log entries: non-DML text is skipped, each
// surviving statement is explained and recorded with its plan rows, and
// writes land in a per-chunk transaction so an arbitrarily large log never
// accumulates an unbounded open write set.

use std::io::Write as _;

use serde_json::Value;

use crate::parser::statement::StatementView;
use crate::store::{MariaDbStore, PlanExecutor, WorkloadStore};
use crate::AdvisorError;

/// One captured entry of an observed query log.
#[derive(Debug, Clone)]
pub struct QueryLogEntry {
    /// The executed statement text, literals included.
    pub query: String,
    /// The parameterized form, when the capture layer kept it.
    pub parameterized: Option<String>,
    /// Call stack of the issuing code, when captured.
    pub call_stack: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Writes per transaction before an intermediate commit.
    pub chunk_size: usize,
    /// Snapshot the schema's table list into the store before ingesting.
    pub record_state: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunk_size: 5_000,
            record_state: true,
        }
    }
}

/// Outcome of one ingestion batch.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub recorded: usize,
    pub skipped: usize,
    /// Set when the store became unreachable and the batch stopped early;
    /// the counters still cover everything processed up to that point.
    pub aborted: bool,
}

/// Only plain DML is worth explaining.
pub fn is_dml_statement(text: &str) -> bool {
    let lead: String = text
        .trim_start()
        .chars()
        .take(6)
        .collect::<String>()
        .to_lowercase();
    ["select", "insert", "update", "delete"].contains(&lead.as_str())
}

/// Ingest a batch of query-log entries into the store.
///
/// Store unreachability stops the batch, prints a remediation hint, and
/// reports the partial counts rather than failing the caller; everything
/// else (unparseable text, unexplainable statements) only skips the one
/// entry involved.
pub async fn ingest_chunk(
    store: &MariaDbStore,
    entries: &[QueryLogEntry],
    options: &IngestOptions,
) -> Result<IngestReport, AdvisorError> {
    let mut report = IngestReport::default();
    let granularity = (options.chunk_size / 100).max(1);

    if options.record_state {
        store.record_database_state().await?;
    }

    let mut tx = store.pool().begin().await?;
    let mut writes = 0usize;

    for entry in entries {
        if !is_dml_statement(&entry.query) {
            report.skipped += 1;
            continue;
        }

        let statement = StatementView::new(&entry.query);
        let plan = match store.explain(statement.raw_text()).await {
            Ok(plan) if plan.is_empty() => {
                println!("Cannot explain query: {}", statement.raw_text());
                report.skipped += 1;
                continue;
            }
            Ok(plan) => plan,
            Err(AdvisorError::Database(msg)) => {
                println!("Cannot explain query: {} ({})", statement.raw_text(), msg);
                report.skipped += 1;
                continue;
            }
            Err(err @ AdvisorError::StoreUnavailable(_)) => {
                report_store_unavailable(&err);
                report.aborted = true;
                break;
            }
            Err(other) => return Err(other),
        };

        let recorded = store
            .record_statement(
                &mut tx,
                &statement.normalized(),
                entry.parameterized.as_deref(),
                entry.call_stack.as_ref(),
                &plan,
            )
            .await;
        match recorded {
            Ok(_) => {}
            Err(err @ AdvisorError::StoreUnavailable(_)) => {
                report_store_unavailable(&err);
                report.aborted = true;
                break;
            }
            Err(other) => return Err(other),
        }

        report.recorded += 1;
        writes += 1 + plan.len();

        // approximate progress, updated in place
        print!(
            "Processed ~{} queries     \r",
            (report.recorded / granularity) * granularity
        );
        let _ = std::io::stdout().flush();

        if writes > options.chunk_size {
            match tx.commit().await.map_err(AdvisorError::from) {
                Ok(()) => {}
                Err(err @ AdvisorError::StoreUnavailable(_)) => {
                    report_store_unavailable(&err);
                    report.aborted = true;
                    println!(
                        "Recorded {} queries, skipped {}",
                        report.recorded, report.skipped
                    );
                    return Ok(report);
                }
                Err(other) => return Err(other),
            }
            tx = store.pool().begin().await?;
            writes = 0;
        }
    }

    if report.aborted {
        // the open chunk cannot be trusted; drop it
        let _ = tx.rollback().await;
    } else {
        tx.commit().await?;
    }
    println!(
        "Recorded {} queries, skipped {}",
        report.recorded, report.skipped
    );
    Ok(report)
}

fn report_store_unavailable(err: &AdvisorError) {
    eprintln!("ERROR: {}", err);
    eprintln!("NOTE: Make sure the database service is running");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dml_detection() {
        assert!(is_dml_statement("select 1"));
        assert!(is_dml_statement("  SELECT `name` FROM `tabNote`"));
        assert!(is_dml_statement("Insert into t values (1)"));
        assert!(is_dml_statement("UPDATE t SET a = 1"));
        assert!(is_dml_statement("delete from t"));
        assert!(!is_dml_statement("show tables"));
        assert!(!is_dml_statement("set autocommit = 0"));
        assert!(!is_dml_statement("begin"));
        assert!(!is_dml_statement(""));
    }

    #[test]
    fn test_default_options() {
        let options = IngestOptions::default();
        assert_eq!(options.chunk_size, 5_000);
        assert!(options.record_state);
    }
}
