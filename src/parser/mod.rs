// SQL structure parsing for index analysis
//
// This module provides just enough SQL understanding to derive index
// candidates: statement kind, the top-level shape of the filter clause,
// projection and order-by columns, and a canonical rendering safe to pass
// to EXPLAIN. It is not a general SQL parser.

pub mod statement;
pub mod tokenizer;

pub use statement::{StatementKind, StatementView};
pub use tokenizer::{tokenize, Token};

/// A possibly table-qualified column reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    /// Table qualification, if written (`note`.`modified` -> Some("note")).
    pub qualifier: Option<String>,
    /// The unquoted column name.
    pub name: String,
}

impl ColumnRef {
    pub fn new(qualifier: Option<String>, name: String) -> Self {
        Self { qualifier, name }
    }

    /// True when the reference is unqualified or qualified to `table`.
    ///
    /// Columns qualified to another table belong to a join partner and
    /// contribute nothing to this table's candidates.
    pub fn belongs_to(&self, table: &str) -> bool {
        match &self.qualifier {
            None => true,
            Some(qualifier) => qualifier == table,
        }
    }
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.qualifier {
            Some(qualifier) => write!(f, "{}.{}", qualifier, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}
