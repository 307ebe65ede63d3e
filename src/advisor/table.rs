// Table identity and the per-table index advisor
//
// Table ids are opaque handles into the workload store; the id<->name
// memoization lives in an explicit cache object constructed once per
// pipeline run. The cache uses RefCell interior mutability and is !Sync:
// one advisor pipeline per process.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use crate::advisor::candidate::{IndexCandidate, Provenance};
use crate::parser::statement::{FilterNode, LogicalOp, StatementKind, StatementView};
use crate::store::{IndexIntrospector, WorkloadStore};
use crate::AdvisorError;

/// Process-run memoization of table id<->name lookups.
pub struct TableNameCache {
    by_id: RefCell<HashMap<u64, String>>,
    by_name: RefCell<HashMap<String, u64>>,
}

impl TableNameCache {
    pub fn new() -> Self {
        Self {
            by_id: RefCell::new(HashMap::new()),
            by_name: RefCell::new(HashMap::new()),
        }
    }

    /// Resolve a table name by id, hitting the store on first use only.
    pub async fn name_of(
        &self,
        store: &impl WorkloadStore,
        id: u64,
    ) -> Result<Option<String>, AdvisorError> {
        if let Some(name) = self.by_id.borrow().get(&id).cloned() {
            return Ok(Some(name));
        }
        let name = store.resolve_table_name(id).await?;
        if let Some(name) = &name {
            self.by_id.borrow_mut().insert(id, name.clone());
            self.by_name.borrow_mut().insert(name.clone(), id);
        }
        Ok(name)
    }

    /// Resolve a table id by name, hitting the store on first use only.
    pub async fn id_of(
        &self,
        store: &impl WorkloadStore,
        name: &str,
    ) -> Result<Option<u64>, AdvisorError> {
        if let Some(id) = self.by_name.borrow().get(name).copied() {
            return Ok(Some(id));
        }
        let id = store.resolve_table_id(name).await?;
        if let Some(id) = id {
            self.by_id.borrow_mut().insert(id, name.to_string());
            self.by_name.borrow_mut().insert(name.to_string(), id);
        }
        Ok(id)
    }
}

impl Default for TableNameCache {
    fn default() -> Self {
        Self::new()
    }
}

/// A table under analysis: store identity plus its resolved name.
pub struct Table {
    id: u64,
    name: String,
}

impl Table {
    pub fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }

    /// Load a table by store id, resolving the name through the cache.
    pub async fn load(
        id: u64,
        store: &impl WorkloadStore,
        cache: &TableNameCache,
    ) -> Result<Self, AdvisorError> {
        let name = cache
            .name_of(store, id)
            .await?
            .ok_or(AdvisorError::UnknownTable(id))?;
        Ok(Self { id, name })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Table({})", self.id)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Extracts and qualifies index candidates for one table.
pub struct TableIndexAdvisor<'t> {
    table: &'t Table,
}

impl<'t> TableIndexAdvisor<'t> {
    pub fn new(table: &'t Table) -> Self {
        Self { table }
    }

    /// Extract candidates from every statement, in input order,
    /// duplicate-free by whole-sequence equality.
    pub fn find_index_candidates<'s>(
        &self,
        statements: &'s [StatementView],
    ) -> Vec<IndexCandidate<'s>> {
        self.find_index_candidates_where(statements, |_| true)
    }

    /// Same, over the statements accepted by `predicate`.
    pub fn find_index_candidates_where<'s, P>(
        &self,
        statements: &'s [StatementView],
        predicate: P,
    ) -> Vec<IndexCandidate<'s>>
    where
        P: Fn(&StatementView) -> bool,
    {
        let mut candidates: Vec<IndexCandidate<'s>> = Vec::new();
        for statement in statements.iter().filter(|s| predicate(s)) {
            let groups = match statement.filter_tree() {
                Some(nodes) => self.filter_groups(statement, nodes),
                None => self.projection_group(statement).into_iter().collect(),
            };
            for group in groups {
                if !candidates.iter().any(|existing| existing == &group) {
                    candidates.push(group);
                }
            }
        }
        candidates
    }

    /// Walk the top-level filter nodes tracking the current boolean
    /// operator: AND extends the open group, OR opens a new one. Columns
    /// qualified to another table are ignored, not merged.
    fn filter_groups<'s>(
        &self,
        statement: &'s StatementView,
        nodes: &[FilterNode],
    ) -> Vec<IndexCandidate<'s>> {
        let mut groups: Vec<IndexCandidate<'s>> = Vec::new();
        let mut current = LogicalOp::And;

        for node in nodes {
            match node {
                FilterNode::Logical(op) => current = *op,
                FilterNode::Comparison { columns, .. } => {
                    let owned: Vec<&str> = columns
                        .iter()
                        .filter(|column| column.belongs_to(&self.table.name))
                        .map(|column| column.name.as_str())
                        .collect();
                    if owned.is_empty() {
                        // pure join predicate
                        continue;
                    }
                    if groups.is_empty() || current == LogicalOp::Or {
                        let mut group =
                            IndexCandidate::new(Provenance::FilterDerived, statement);
                        group.extend_columns(owned);
                        groups.push(group);
                    } else {
                        let group = groups.last_mut().unwrap();
                        group.extend_columns(owned);
                    }
                }
                FilterNode::Group | FilterNode::Other => {}
            }
        }

        // a statement can repeat the same group across OR arms
        let mut unique: Vec<IndexCandidate<'s>> = Vec::new();
        for group in groups {
            if !group.is_empty() && !unique.iter().any(|existing| existing == &group) {
                unique.push(group);
            }
        }
        unique
    }

    /// Covering-index fallback for filterless SELECTs: projected columns
    /// followed by order-by columns, under the same qualification rule.
    fn projection_group<'s>(&self, statement: &'s StatementView) -> Option<IndexCandidate<'s>> {
        if statement.kind() != StatementKind::Select {
            return None;
        }
        let mut group = IndexCandidate::new(Provenance::ProjectionDerived, statement);
        for column in statement
            .projection_columns()
            .iter()
            .chain(statement.order_by_columns().iter())
        {
            if column.belongs_to(&self.table.name) {
                group.try_append(&column.name);
            }
        }
        if group.is_empty() {
            None
        } else {
            Some(group)
        }
    }

    /// Drop candidates whose column sequence already exists as an index.
    ///
    /// Exact-sequence exclusion only: a candidate that is a prefix of a
    /// longer existing composite index still passes through.
    pub async fn qualify<'s>(
        &self,
        candidates: Vec<IndexCandidate<'s>>,
        introspector: &impl IndexIntrospector,
    ) -> Result<Vec<IndexCandidate<'s>>, AdvisorError> {
        let existing = introspector.list_indexes(&self.table.name).await?;
        Ok(candidates
            .into_iter()
            .filter(|candidate| {
                !existing
                    .iter()
                    .any(|sequence| sequence.as_slice() == candidate.columns())
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn note() -> Table {
        Table::new(1, "tabNote")
    }

    /// Store answering one fixed id<->name pair and counting lookups.
    struct CountingStore {
        id: u64,
        name: String,
        lookups: Cell<usize>,
    }

    impl WorkloadStore for CountingStore {
        async fn table_exists(&self, name: &str) -> Result<bool, AdvisorError> {
            Ok(name == self.name)
        }

        async fn resolve_table_id(&self, name: &str) -> Result<Option<u64>, AdvisorError> {
            self.lookups.set(self.lookups.get() + 1);
            Ok((name == self.name).then_some(self.id))
        }

        async fn resolve_table_name(&self, id: u64) -> Result<Option<String>, AdvisorError> {
            self.lookups.set(self.lookups.get() + 1);
            Ok((id == self.id).then(|| self.name.clone()))
        }

        async fn record_table(&self, _name: &str) -> Result<u64, AdvisorError> {
            Ok(self.id)
        }

        async fn record_database_state(&self) -> Result<usize, AdvisorError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_name_cache_hits_the_store_once() {
        let store = CountingStore {
            id: 7,
            name: "tabNote".to_string(),
            lookups: Cell::new(0),
        };
        let cache = TableNameCache::new();

        let table = Table::load(7, &store, &cache).await.unwrap();
        assert_eq!(table.name(), "tabNote");
        assert_eq!(format!("{:?}", table), "Table(7)");
        assert_eq!(table.to_string(), "tabNote");

        // both directions are primed by the first lookup
        assert_eq!(cache.name_of(&store, 7).await.unwrap().as_deref(), Some("tabNote"));
        assert_eq!(cache.id_of(&store, "tabNote").await.unwrap(), Some(7));
        assert_eq!(store.lookups.get(), 1);
    }

    #[test]
    fn test_loading_an_unknown_id_is_an_error() {
        let store = CountingStore {
            id: 7,
            name: "tabNote".to_string(),
            lookups: Cell::new(0),
        };
        let cache = TableNameCache::new();
        let loaded = tokio_test::block_on(Table::load(99, &store, &cache));
        assert!(matches!(loaded, Err(AdvisorError::UnknownTable(99))));
    }

    #[test]
    fn test_or_split_keeps_comparison_order() {
        let table = note();
        let statements = vec![StatementView::new(
            "select `name` from `tabNote` where `modified` = `creation` or `creation` > `modified`",
        )];
        let candidates = TableIndexAdvisor::new(&table).find_index_candidates(&statements);

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].columns(), &["modified", "creation"]);
        assert_eq!(candidates[1].columns(), &["creation", "modified"]);
        assert_eq!(candidates[0].provenance(), Provenance::FilterDerived);
    }

    #[test]
    fn test_order_by_is_not_merged_into_filter_candidates() {
        let table = note();
        let statements = vec![StatementView::new(
            "select `name` from `tabNote` where `modified` = `creation` or `creation` > '2023-02-13 13:35:01.556111' order by `title`",
        )];
        let candidates = TableIndexAdvisor::new(&table).find_index_candidates(&statements);

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].columns(), &["modified", "creation"]);
        assert_eq!(candidates[1].columns(), &["creation"]);
    }

    #[test]
    fn test_and_extends_the_open_group() {
        let table = note();
        let statements = vec![StatementView::new(
            "select `name` from `tabNote` where `owner` = 'x' and `idx` > 3 or `title` = 'y' and `idx` > 4",
        )];
        let candidates = TableIndexAdvisor::new(&table).find_index_candidates(&statements);

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].columns(), &["owner", "idx"]);
        assert_eq!(candidates[1].columns(), &["title", "idx"]);
    }

    #[test]
    fn test_foreign_table_columns_are_ignored() {
        let table = note();
        let statements = vec![StatementView::new(
            "select `name` from `tabNote` where `tabUser`.`email` = `tabNote`.`owner` and `tabUser`.`enabled` = 1",
        )];
        let candidates = TableIndexAdvisor::new(&table).find_index_candidates(&statements);

        // the second comparison references only the join partner
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].columns(), &["owner"]);
    }

    #[test]
    fn test_projection_fallback_with_ordering() {
        let table = Table::new(2, "tabQuality Goal");
        let statements = vec![StatementView::new(
            "select `name`, `frequency`, `date`, `weekday` from `tabQuality Goal` order by `tabQuality Goal`.`modified` DESC",
        )];
        let candidates = TableIndexAdvisor::new(&table).find_index_candidates(&statements);

        assert_eq!(candidates.len(), 1);
        assert_eq!(
            candidates[0].columns(),
            &["name", "frequency", "date", "weekday", "modified"]
        );
        assert_eq!(candidates[0].provenance(), Provenance::ProjectionDerived);
    }

    #[test]
    fn test_projection_fallback_resolves_aliases() {
        let table = Table::new(2, "tabQuality Goal");
        let statements = vec![StatementView::new(
            "select `name` as `aliased_name` from `tabQuality Goal` order by `tabQuality Goal`.`modified` DESC",
        )];
        let candidates = TableIndexAdvisor::new(&table).find_index_candidates(&statements);

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].columns(), &["name", "modified"]);
    }

    #[test]
    fn test_no_projection_fallback_for_non_select() {
        let table = note();
        let statements = vec![StatementView::new("delete from `tabNote`")];
        let candidates = TableIndexAdvisor::new(&table).find_index_candidates(&statements);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_duplicates_collapse_across_statements() {
        let table = note();
        let statements = vec![
            StatementView::new("select `name` from `tabNote` where `owner` = 'a'"),
            StatementView::new("select `title` from `tabNote` where `owner` = 'b'"),
        ];
        let candidates = TableIndexAdvisor::new(&table).find_index_candidates(&statements);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].columns(), &["owner"]);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let table = note();
        let statements = vec![
            StatementView::new(
                "select `name` from `tabNote` where `modified` = `creation` or `creation` > `modified`",
            ),
            StatementView::new("select `name`, `title` from `tabNote`"),
        ];
        let advisor = TableIndexAdvisor::new(&table);

        let first: Vec<Vec<String>> = advisor
            .find_index_candidates(&statements)
            .iter()
            .map(|c| c.columns().to_vec())
            .collect();
        let second: Vec<Vec<String>> = advisor
            .find_index_candidates(&statements)
            .iter()
            .map(|c| c.columns().to_vec())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_malformed_statement_is_skipped() {
        let table = note();
        let statements = vec![
            StatementView::new("select `name from `tabNote` where `owner` = 'a'"),
            StatementView::new("select `name` from `tabNote` where `owner` = 'a'"),
        ];
        let candidates = TableIndexAdvisor::new(&table).find_index_candidates(&statements);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].columns(), &["owner"]);
    }

    #[test]
    fn test_statement_predicate_filters_input() {
        let table = note();
        let statements = vec![
            StatementView::new("select `name` from `tabNote` where `owner` = 'a'"),
            StatementView::new("select `name` from `tabNote` where `title` = 'b'"),
        ];
        let advisor = TableIndexAdvisor::new(&table);
        let candidates = advisor
            .find_index_candidates_where(&statements, |s| s.raw_text().contains("`title`"));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].columns(), &["title"]);
    }
}
