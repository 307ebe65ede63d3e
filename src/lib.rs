//! Composite index advice derived from observed SQL workloads.
//!
//! The crate walks captured statements to extract ordered candidate column
//! groups per table (AND-joined predicates share a group, OR-joined
//! predicates split into separate groups), drops candidates that already
//! exist as indexes, and verifies the survivors by explaining their sample
//! statements against the live planner before and after a structural change.

#![allow(async_fn_in_trait)]

pub mod advisor;
pub mod benchmark;
pub mod ingest;
pub mod parser;
pub mod store;

pub use advisor::candidate::{IndexCandidate, Provenance};
pub use advisor::table::{Table, TableIndexAdvisor, TableNameCache};
pub use benchmark::{PlanBenchmark, PlanComparison};
pub use ingest::{ingest_chunk, IngestOptions, IngestReport, QueryLogEntry};
pub use parser::statement::{StatementKind, StatementView};
pub use store::{IndexIntrospector, MariaDbStore, PlanExecutor, PlanRow, WorkloadStore};

// ============================================================================
// Errors
// ============================================================================

/// Error type shared across the advisor pipeline.
#[derive(Debug)]
pub enum AdvisorError {
    /// A statement-level database error (bad SQL, missing table, ...).
    Database(String),
    /// A connection-class failure: the store itself cannot be reached.
    StoreUnavailable(String),
    /// The tokenizer rejected the statement text.
    Parse(String),
    /// A benchmark scope was driven out of order.
    InvalidState(String),
    /// A table id with no name in the store.
    UnknownTable(u64),
}

impl std::fmt::Display for AdvisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdvisorError::Database(msg) => write!(f, "Database error: {}", msg),
            AdvisorError::StoreUnavailable(msg) => write!(f, "Store unavailable: {}", msg),
            AdvisorError::Parse(msg) => write!(f, "Parse error: {}", msg),
            AdvisorError::InvalidState(msg) => write!(f, "Invalid benchmark state: {}", msg),
            AdvisorError::UnknownTable(id) => write!(f, "No table recorded with id {}", id),
        }
    }
}

impl std::error::Error for AdvisorError {}

impl From<sqlx::Error> for AdvisorError {
    fn from(err: sqlx::Error) -> Self {
        // Connection-class failures get their own variant so batch callers
        // can surface a remediation hint instead of a bare SQL error.
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => AdvisorError::StoreUnavailable(err.to_string()),
            other => AdvisorError::Database(other.to_string()),
        }
    }
}
