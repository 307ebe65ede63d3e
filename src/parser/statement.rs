// StatementView - structural view over one observed SQL statement
//
// Construction only trims the text and classifies the statement kind; the
// structural fields (filter nodes, projection, order-by) are computed on
// first use and cached for the statement's lifetime. A statement that the
// tokenizer rejects simply has no structure: extraction yields nothing and
// the surrounding batch keeps going.

use once_cell::unsync::OnceCell;

use super::tokenizer::{tokenize, Token};
use super::ColumnRef;

/// Statement kind, taken from the leading word of the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

/// Logical connective between top-level filter terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// One top-level node of the filter clause.
///
/// Parenthesized subexpressions are opaque (`Group`) at this granularity,
/// as are forms that are not plain comparisons (`IN`, `IS NULL`, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Comparison {
        /// Identifier operands in order of appearance.
        columns: Vec<ColumnRef>,
        operator: String,
    },
    Logical(LogicalOp),
    Group,
    Other,
}

/// Immutable structural view over a raw SQL statement.
pub struct StatementView {
    raw: String,
    kind: StatementKind,
    owner_table: Option<String>,
    tokens: OnceCell<Vec<Token>>,
    filter: OnceCell<Option<Vec<FilterNode>>>,
    projection: OnceCell<Vec<ColumnRef>>,
    order_by: OnceCell<Vec<ColumnRef>>,
}

impl std::fmt::Debug for StatementView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StatementView({:?}, {:?})", self.kind, self.raw)
    }
}

impl StatementView {
    pub fn new(sql: &str) -> Self {
        let raw = sql.trim().to_string();
        let kind = leading_kind(&raw);
        Self {
            raw,
            kind,
            owner_table: None,
            tokens: OnceCell::new(),
            filter: OnceCell::new(),
            projection: OnceCell::new(),
            order_by: OnceCell::new(),
        }
    }

    /// Attach the table this statement was observed against. Lookup-only;
    /// extraction is always driven by the advisor's own table.
    pub fn for_table(mut self, table: &str) -> Self {
        self.owner_table = Some(table.to_string());
        self
    }

    pub fn raw_text(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn owner_table(&self) -> Option<&str> {
        self.owner_table.as_deref()
    }

    fn tokens(&self) -> &[Token] {
        self.tokens
            .get_or_init(|| tokenize(&self.raw).unwrap_or_default())
    }

    /// Top-level filter nodes, or None when the statement has no filter
    /// clause (including the unparseable case).
    pub fn filter_tree(&self) -> Option<&[FilterNode]> {
        self.filter
            .get_or_init(|| {
                let tokens = self.tokens();
                let clause = clause_tokens(tokens, "WHERE", &["ORDER", "GROUP", "HAVING", "LIMIT"])?;
                Some(build_filter_nodes(clause))
            })
            .as_deref()
    }

    /// Projected columns in statement order, aliases resolved to the
    /// underlying column. Stars and function calls contribute nothing.
    pub fn projection_columns(&self) -> &[ColumnRef] {
        self.projection.get_or_init(|| {
            if self.kind != StatementKind::Select {
                return Vec::new();
            }
            let tokens = self.tokens();
            match clause_tokens(tokens, "SELECT", &["FROM"]) {
                Some(clause) => comma_items(clause)
                    .into_iter()
                    .filter_map(item_column)
                    .collect(),
                None => Vec::new(),
            }
        })
    }

    /// Order-by columns in statement order.
    pub fn order_by_columns(&self) -> &[ColumnRef] {
        self.order_by.get_or_init(|| {
            let tokens = self.tokens();
            match order_by_tokens(tokens) {
                Some(clause) => comma_items(clause)
                    .into_iter()
                    .filter_map(item_column)
                    .collect(),
                None => Vec::new(),
            }
        })
    }

    /// Canonical rendering: keywords upper-cased, whitespace collapsed,
    /// placeholders kept as written. Used as the deduplication key when
    /// recording observed statements.
    pub fn normalized(&self) -> String {
        let tokens = self.tokens();
        if tokens.is_empty() {
            return self.raw.clone();
        }
        render(tokens, false)
    }

    /// The normalized statement with every bind-parameter marker replaced
    /// by the literal constant `1`, deterministic and safe to EXPLAIN.
    pub fn sample(&self) -> String {
        let tokens = self.tokens();
        if tokens.is_empty() {
            return self.raw.clone();
        }
        render(tokens, true)
    }
}

fn leading_kind(raw: &str) -> StatementKind {
    let first = raw.split_whitespace().next().unwrap_or("");
    match first.to_uppercase().as_str() {
        "SELECT" => StatementKind::Select,
        "INSERT" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        _ => StatementKind::Other,
    }
}

/// Slice out the tokens of one clause: everything after the first depth-0
/// `opener` keyword up to the next depth-0 terminator keyword.
fn clause_tokens<'t>(
    tokens: &'t [Token],
    opener: &str,
    terminators: &[&str],
) -> Option<&'t [Token]> {
    let mut depth = 0usize;
    let mut start = None;
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::OpenParen => depth += 1,
            Token::CloseParen => depth = depth.saturating_sub(1),
            Token::Keyword(k) if depth == 0 => {
                if start.is_none() {
                    if k == opener {
                        start = Some(i + 1);
                    }
                } else if terminators.iter().any(|t| t == k) {
                    return Some(&tokens[start.unwrap()..i]);
                }
            }
            _ => {}
        }
    }
    start.map(|s| &tokens[s..])
}

/// Tokens of the ORDER BY list (after the BY keyword), if present.
fn order_by_tokens(tokens: &[Token]) -> Option<&[Token]> {
    let clause = clause_tokens(tokens, "ORDER", &["LIMIT", "OFFSET", "FOR", "UNION"])?;
    match clause.first() {
        Some(Token::Keyword(k)) if k == "BY" => Some(&clause[1..]),
        _ => None,
    }
}

/// Split a clause at depth-0 commas.
fn comma_items(tokens: &[Token]) -> Vec<&[Token]> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::OpenParen => depth += 1,
            Token::CloseParen => depth = depth.saturating_sub(1),
            Token::Comma if depth == 0 => {
                items.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&tokens[start..]);
    items.into_iter().filter(|item| !item.is_empty()).collect()
}

/// The underlying column of one projection or order-by item.
///
/// The first depth-0 identifier wins, so `name AS aliased_name` resolves to
/// `name`. An identifier opening a call (`COUNT(`) is a function name, not a
/// column; items carrying only stars or expressions resolve to nothing.
fn item_column(item: &[Token]) -> Option<ColumnRef> {
    let mut depth = 0usize;
    for (i, token) in item.iter().enumerate() {
        match token {
            Token::OpenParen => depth += 1,
            Token::CloseParen => depth = depth.saturating_sub(1),
            Token::Identifier {
                qualifier, name, ..
            } if depth == 0 => {
                if matches!(item.get(i + 1), Some(Token::OpenParen)) {
                    return None;
                }
                return Some(ColumnRef::new(qualifier.clone(), name.clone()));
            }
            _ => {}
        }
    }
    None
}

/// Build the top-level filter nodes: terms chunked at depth-0 AND/OR.
fn build_filter_nodes(tokens: &[Token]) -> Vec<FilterNode> {
    let mut nodes = Vec::new();
    let mut chunk: Vec<&Token> = Vec::new();
    let mut depth = 0usize;

    for token in tokens {
        match token {
            Token::OpenParen => {
                depth += 1;
                chunk.push(token);
            }
            Token::CloseParen => {
                depth = depth.saturating_sub(1);
                chunk.push(token);
            }
            Token::Keyword(k) if depth == 0 && (k == "AND" || k == "OR") => {
                if !chunk.is_empty() {
                    nodes.push(classify_term(&chunk));
                    chunk.clear();
                }
                let op = if k == "AND" { LogicalOp::And } else { LogicalOp::Or };
                nodes.push(FilterNode::Logical(op));
            }
            _ => chunk.push(token),
        }
    }
    if !chunk.is_empty() {
        nodes.push(classify_term(&chunk));
    }
    nodes
}

/// Classify one AND/OR-delimited term.
fn classify_term(chunk: &[&Token]) -> FilterNode {
    if matches!(chunk.first(), Some(Token::OpenParen)) {
        return FilterNode::Group;
    }

    let mut depth = 0usize;
    let mut operator: Option<String> = None;
    let mut columns = Vec::new();

    for (i, token) in chunk.iter().enumerate() {
        match token {
            Token::OpenParen => depth += 1,
            Token::CloseParen => depth = depth.saturating_sub(1),
            Token::Operator(op) if depth == 0 => {
                if operator.is_none() {
                    operator = Some(op.clone());
                }
            }
            Token::Keyword(k) if depth == 0 && k == "LIKE" => {
                if operator.is_none() {
                    operator = Some("LIKE".to_string());
                }
            }
            Token::Identifier {
                qualifier, name, ..
            } if depth == 0 => {
                if matches!(chunk.get(i + 1), Some(Token::OpenParen)) {
                    continue; // function name
                }
                columns.push(ColumnRef::new(qualifier.clone(), name.clone()));
            }
            _ => {}
        }
    }

    match operator {
        Some(operator) => FilterNode::Comparison { columns, operator },
        None => FilterNode::Other,
    }
}

/// Canonical single-line rendering of a token stream.
fn render(tokens: &[Token], substitute_placeholders: bool) -> String {
    let mut out = String::new();
    let mut previous_was_identifier = false;

    for token in tokens {
        let piece: &str = match token {
            Token::Identifier { raw, .. } => raw,
            Token::Keyword(k) => k,
            Token::Operator(op) => op,
            Token::Number(n) => n,
            Token::Text(t) => t,
            Token::Placeholder(raw) => {
                if substitute_placeholders {
                    "1"
                } else {
                    raw
                }
            }
            Token::Comma => ",",
            Token::OpenParen => "(",
            Token::CloseParen => ")",
            Token::Star => "*",
            Token::Other(o) => o,
        };

        let suppress_space = out.is_empty()
            || out.ends_with('(')
            || matches!(token, Token::Comma | Token::CloseParen)
            || (matches!(token, Token::OpenParen) && previous_was_identifier);
        if !suppress_space {
            out.push(' ');
        }
        out.push_str(piece);
        previous_was_identifier = matches!(token, Token::Identifier { .. });
    }

    out
}
