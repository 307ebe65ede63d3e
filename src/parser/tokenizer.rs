// SQL tokenizer
//
// Character-walking tokenizer for the subset of SQL structure the advisor
// inspects. Identifiers keep their written quoting in `raw` so a statement
// can be re-rendered verbatim for EXPLAIN; classification happens once here
// and everything downstream pattern-matches on the variants.

use once_cell::sync::Lazy;
use std::collections::HashSet;

use crate::AdvisorError;

static KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "SELECT", "INSERT", "UPDATE", "DELETE", "FROM", "WHERE", "AND", "OR", "NOT", "ORDER",
        "GROUP", "BY", "HAVING", "LIMIT", "OFFSET", "AS", "IN", "LIKE", "BETWEEN", "IS", "NULL",
        "INTO", "VALUES", "SET", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS", "ON",
        "UNION", "ALL", "DISTINCT", "ASC", "DESC", "EXISTS", "CASE", "WHEN", "THEN", "ELSE", "END",
        "FOR", "INTERVAL",
    ]
    .into_iter()
    .collect()
});

/// One lexical unit of a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Possibly-qualified column or table reference; `raw` preserves quoting.
    Identifier {
        qualifier: Option<String>,
        name: String,
        raw: String,
    },
    /// Reserved word, stored upper-cased.
    Keyword(String),
    /// Comparison operator (`=`, `!=`, `<>`, `<`, `>`, `<=`, `>=`).
    Operator(String),
    /// Numeric literal, as written.
    Number(String),
    /// Single-quoted string literal, quotes included.
    Text(String),
    /// Bind-parameter marker (`?`, `%s`, `%(name)s`, `$1`, `:name`), as written.
    Placeholder(String),
    Comma,
    OpenParen,
    CloseParen,
    Star,
    /// Anything the advisor has no use for (`;`, arithmetic, `t.*`, ...).
    Other(String),
}

/// Tokenize a statement.
///
/// Unterminated quoting is an error; the caller decides whether that is
/// fatal (the advisor pipeline treats it as "no structure" and moves on).
pub fn tokenize(sql: &str) -> Result<Vec<Token>, AdvisorError> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        match c {
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::OpenParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::CloseParen);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '\'' => {
                let (raw, next) = scan_quoted(&chars, i, '\'')?;
                tokens.push(Token::Text(raw));
                i = next;
            }
            '`' | '"' => {
                let (token, next) = scan_identifier(&chars, i)?;
                tokens.push(token);
                i = next;
            }
            '?' => {
                tokens.push(Token::Placeholder("?".to_string()));
                i += 1;
            }
            '%' => {
                let (token, next) = scan_percent_placeholder(&chars, i);
                tokens.push(token);
                i = next;
            }
            '$' if i + 1 < chars.len() && chars[i + 1].is_ascii_digit() => {
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_ascii_digit() {
                    j += 1;
                }
                tokens.push(Token::Placeholder(chars[i..j].iter().collect()));
                i = j;
            }
            ':' if i + 1 < chars.len() && (chars[i + 1].is_alphabetic() || chars[i + 1] == '_') => {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                tokens.push(Token::Placeholder(chars[i..j].iter().collect()));
                i = j;
            }
            '=' => {
                tokens.push(Token::Operator("=".to_string()));
                i += 1;
            }
            '!' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Operator("!=".to_string()));
                i += 2;
            }
            '<' => {
                let op = if i + 1 < chars.len() && chars[i + 1] == '=' {
                    i += 2;
                    "<="
                } else if i + 1 < chars.len() && chars[i + 1] == '>' {
                    i += 2;
                    "<>"
                } else {
                    i += 1;
                    "<"
                };
                tokens.push(Token::Operator(op.to_string()));
            }
            '>' => {
                let op = if i + 1 < chars.len() && chars[i + 1] == '=' {
                    i += 2;
                    ">="
                } else {
                    i += 1;
                    ">"
                };
                tokens.push(Token::Operator(op.to_string()));
            }
            c if c.is_ascii_digit() => {
                let mut j = i;
                while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                    j += 1;
                }
                tokens.push(Token::Number(chars[i..j].iter().collect()));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' => {
                let (token, next) = scan_identifier(&chars, i)?;
                tokens.push(token);
                i = next;
            }
            other => {
                tokens.push(Token::Other(other.to_string()));
                i += 1;
            }
        }
    }

    Ok(tokens)
}

/// Scan a quote-delimited run, doubling as the escape (`''`, ` `` `).
/// Returns the raw text including the delimiters and the next position.
fn scan_quoted(
    chars: &[char],
    start: usize,
    delimiter: char,
) -> Result<(String, usize), AdvisorError> {
    let mut i = start + 1;
    loop {
        if i >= chars.len() {
            return Err(AdvisorError::Parse(format!(
                "unterminated {} quote",
                delimiter
            )));
        }
        if chars[i] == delimiter {
            if i + 1 < chars.len() && chars[i + 1] == delimiter {
                i += 2;
            } else {
                i += 1;
                break;
            }
        } else {
            i += 1;
        }
    }
    Ok((chars[start..i].iter().collect(), i))
}

/// Scan one identifier part: a quoted run or a bare word.
/// Returns (unquoted name, raw text, next position).
fn scan_identifier_part(
    chars: &[char],
    start: usize,
) -> Result<Option<(String, String, usize)>, AdvisorError> {
    if start >= chars.len() {
        return Ok(None);
    }
    let c = chars[start];
    if c == '`' || c == '"' {
        let (raw, next) = scan_quoted(chars, start, c)?;
        let inner: String = raw[1..raw.len() - 1].replace(&format!("{}{}", c, c), &c.to_string());
        Ok(Some((inner, raw, next)))
    } else if c.is_alphabetic() || c == '_' {
        let mut j = start;
        while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_' || chars[j] == '$')
        {
            j += 1;
        }
        let word: String = chars[start..j].iter().collect();
        Ok(Some((word.clone(), word, j)))
    } else {
        Ok(None)
    }
}

/// Scan an identifier, following one `.` of qualification. A bare word with
/// no dot after it is checked against the keyword table.
fn scan_identifier(chars: &[char], start: usize) -> Result<(Token, usize), AdvisorError> {
    let (first_name, first_raw, mut i) = match scan_identifier_part(chars, start)? {
        Some(part) => part,
        None => {
            return Ok((Token::Other(chars[start].to_string()), start + 1));
        }
    };

    let qualified = i < chars.len() && chars[i] == '.';
    if !qualified {
        let upper = first_name.to_uppercase();
        if chars[start] != '`' && chars[start] != '"' && KEYWORDS.contains(upper.as_str()) {
            return Ok((Token::Keyword(upper), i));
        }
        return Ok((
            Token::Identifier {
                qualifier: None,
                name: first_name,
                raw: first_raw,
            },
            i,
        ));
    }

    i += 1; // consume the dot
    if i < chars.len() && chars[i] == '*' {
        // `t.*` is opaque at this granularity
        return Ok((Token::Other(format!("{}.*", first_raw)), i + 1));
    }
    match scan_identifier_part(chars, i)? {
        Some((name, raw, next)) => Ok((
            Token::Identifier {
                qualifier: Some(first_name),
                name,
                raw: format!("{}.{}", first_raw, raw),
            },
            next,
        )),
        None => Ok((Token::Other(format!("{}.", first_raw)), i)),
    }
}

/// `%s` and `%(name)s` markers from logged parameterized statements.
fn scan_percent_placeholder(chars: &[char], start: usize) -> (Token, usize) {
    if start + 1 < chars.len() && chars[start + 1] == 's' {
        return (Token::Placeholder("%s".to_string()), start + 2);
    }
    if start + 1 < chars.len() && chars[start + 1] == '(' {
        let mut j = start + 2;
        while j < chars.len() && chars[j] != ')' {
            j += 1;
        }
        if j + 1 < chars.len() && chars[j + 1] == 's' {
            return (
                Token::Placeholder(chars[start..=j + 1].iter().collect()),
                j + 2,
            );
        }
    }
    (Token::Other("%".to_string()), start + 1)
}
