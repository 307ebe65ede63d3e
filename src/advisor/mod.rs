// Index candidate extraction
//
// Derives ordered candidate column groups per table from observed
// statements and qualifies them against the indexes the table already has.

pub mod candidate;
pub mod table;

pub use candidate::{IndexCandidate, Provenance};
pub use table::{Table, TableIndexAdvisor, TableNameCache};
