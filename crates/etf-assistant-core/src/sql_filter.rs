//! WHERE-clause literal extraction for generated SQL.
//!
//! Finds every literal compared with `=`, `IN` or `LIKE` inside a WHERE
//! clause and reports it as a `(column, value)` pair, one pair per `IN`
//! list element. The scan is lexical: a small tokenizer understands
//! string and numeric literals, quoted identifiers (`"col"`, `` `col` ``,
//! `[col]`), qualified names (`t.col`), comments, and single-argument
//! function wrappers such as `LOWER("col") = LOWER('ireland')`.
//!
//! Each hit also records the byte span of its literal so that
//! [`substitute_literals`] can rewrite values in place without touching
//! the rest of the query.
//!
//! ```rust
//! use etf_assistant_core::sql_filter::extract_filters;
//!
//! let filters = extract_filters(
//!     r#"SELECT * FROM etf_search_data WHERE "currency" IN ('EUR', 'USD') AND name LIKE '%MSCI%'"#,
//! );
//! let pairs: Vec<(&str, &str)> = filters
//!     .iter()
//!     .map(|f| (f.column.as_str(), f.value.as_str()))
//!     .collect();
//! assert_eq!(pairs, vec![("currency", "EUR"), ("currency", "USD"), ("name", "%MSCI%")]);
//! ```

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// A `(column, value)` pair used as a filter condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub column: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    In,
    Like,
}

/// Where a filter literal sits in the query text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralSite {
    pub filter: QueryFilter,
    pub op: FilterOp,
    /// Byte range of the literal token, quotes included.
    pub span: Range<usize>,
    /// True for string literals, false for numbers.
    pub quoted: bool,
}

/// Extract every WHERE-clause filter pair from `sql`, in query order.
pub fn extract_filters(sql: &str) -> Vec<QueryFilter> {
    scan_literals(sql).into_iter().map(|s| s.filter).collect()
}

/// Replace string literals compared with `=` or `IN`.
///
/// Each replacement is `(column, old_value, new_value)`; column names
/// match case-insensitively. `LIKE` patterns and numeric literals are
/// left untouched.
pub fn substitute_literals(sql: &str, replacements: &[(String, String, String)]) -> String {
    let mut edits: Vec<(Range<usize>, String)> = scan_literals(sql)
        .into_iter()
        .filter(|s| s.quoted && s.op != FilterOp::Like)
        .filter_map(|s| {
            replacements
                .iter()
                .find(|(col, old, _)| {
                    col.eq_ignore_ascii_case(&s.filter.column) && *old == s.filter.value
                })
                .map(|(_, _, new)| (s.span.clone(), quote_string(new)))
        })
        .collect();

    edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    let mut out = sql.to_string();
    for (span, text) in edits {
        out.replace_range(span, &text);
    }
    out
}

/// Render `value` as a single-quoted SQL string literal.
pub fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Locate every filter literal in WHERE clauses of `sql`.
pub fn scan_literals(sql: &str) -> Vec<LiteralSite> {
    let tokens = tokenize(sql);
    let in_where = where_mask(&tokens);
    let mut sites = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        if !in_where[i] {
            i += 1;
            continue;
        }
        match &tokens[i].tok {
            Tok::Sym(s) if s == "=" || s == "==" => {
                if let (Some(column), Some(lit)) = (
                    i.checked_sub(1).and_then(|j| column_ending_at(&tokens, j)),
                    literal_at(&tokens, i + 1),
                ) {
                    sites.push(lit.site(column, FilterOp::Eq));
                } else if let (Some(lit), Some(column)) = (
                    i.checked_sub(1).and_then(|j| bare_literal(&tokens, j)),
                    column_starting_at(&tokens, i + 1),
                ) {
                    sites.push(lit.site(column, FilterOp::Eq));
                }
            }
            Tok::Word(w) if w.eq_ignore_ascii_case("LIKE") => {
                if let (Some(column), Some(lit)) =
                    (left_column(&tokens, i), literal_at(&tokens, i + 1))
                {
                    sites.push(lit.site(column, FilterOp::Like));
                }
            }
            Tok::Word(w) if w.eq_ignore_ascii_case("IN") => {
                if let Some(column) = left_column(&tokens, i) {
                    if let Some((items, next)) = literal_list(&tokens, i + 1) {
                        sites.extend(
                            items
                                .into_iter()
                                .map(|lit| lit.site(column.clone(), FilterOp::In)),
                        );
                        i = next;
                        continue;
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }

    sites
}

// ============ Tokenizer ============

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    /// Bare identifier or keyword.
    Word(String),
    /// Quoted identifier, quotes stripped.
    Quoted(String),
    /// String literal, unescaped.
    Str(String),
    Num(String),
    Sym(String),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    span: Range<usize>,
}

fn tokenize(sql: &str) -> Vec<Token> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c == b'-' && bytes.get(i + 1) == Some(&b'-') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if c == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i += 2;
            while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                i += 1;
            }
            i = (i + 2).min(bytes.len());
            continue;
        }

        let tok = match c {
            b'\'' => {
                let (value, end) = read_delimited(sql, i, b'\'', b'\'');
                i = end;
                Tok::Str(value)
            }
            b'"' => {
                let (value, end) = read_delimited(sql, i, b'"', b'"');
                i = end;
                Tok::Quoted(value)
            }
            b'`' => {
                let (value, end) = read_delimited(sql, i, b'`', b'`');
                i = end;
                Tok::Quoted(value)
            }
            b'[' => {
                let (value, end) = read_delimited(sql, i, b'[', b']');
                i = end;
                Tok::Quoted(value)
            }
            b'0'..=b'9' => {
                i = read_number(bytes, i);
                Tok::Num(sql[start..i].to_string())
            }
            b'.' if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                i = read_number(bytes, i);
                Tok::Num(sql[start..i].to_string())
            }
            _ if c == b'_' || c.is_ascii_alphabetic() || c >= 0x80 => {
                while i < bytes.len()
                    && (bytes[i] == b'_'
                        || bytes[i] == b'$'
                        || bytes[i].is_ascii_alphanumeric()
                        || bytes[i] >= 0x80)
                {
                    i += 1;
                }
                Tok::Word(sql[start..i].to_string())
            }
            _ => {
                let two = sql.get(i..i + 2).unwrap_or("");
                if matches!(two, "<>" | "!=" | ">=" | "<=" | "==" | "||") {
                    i += 2;
                    Tok::Sym(two.to_string())
                } else {
                    i += 1;
                    Tok::Sym((c as char).to_string())
                }
            }
        };

        tokens.push(Token {
            tok,
            span: start..i,
        });
    }

    tokens
}

/// Read a delimited token starting at `start`. A doubled closing
/// delimiter is an escaped delimiter. Unterminated tokens run to the end.
fn read_delimited(sql: &str, start: usize, open: u8, close: u8) -> (String, usize) {
    let bytes = sql.as_bytes();
    debug_assert_eq!(bytes[start], open);
    let mut value = Vec::new();
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == close {
            if open == close && bytes.get(i + 1) == Some(&close) {
                value.push(close);
                i += 2;
                continue;
            }
            return (String::from_utf8_lossy(&value).into_owned(), i + 1);
        }
        value.push(bytes[i]);
        i += 1;
    }
    (String::from_utf8_lossy(&value).into_owned(), bytes.len())
}

fn read_number(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' | b'.' => i += 1,
            b'e' | b'E' => {
                i += 1;
                if matches!(bytes.get(i), Some(b'+') | Some(b'-')) {
                    i += 1;
                }
            }
            _ => break,
        }
    }
    i
}

// ============ Clause tracking ============

const CLAUSE_ENDS: &[&str] = &[
    "GROUP", "ORDER", "LIMIT", "HAVING", "UNION", "EXCEPT", "INTERSECT", "WINDOW", "RETURNING",
];

const RESERVED: &[&str] = &[
    "AND", "OR", "NOT", "WHERE", "SELECT", "FROM", "IN", "LIKE", "IS", "NULL", "BETWEEN", "CASE",
    "WHEN", "THEN", "ELSE", "END", "EXISTS", "ON", "AS", "ESCAPE", "COLLATE",
];

fn is_word(tok: &Tok, word: &str) -> bool {
    matches!(tok, Tok::Word(w) if w.eq_ignore_ascii_case(word))
}

fn is_sym(tok: &Tok, sym: &str) -> bool {
    matches!(tok, Tok::Sym(s) if s == sym)
}

/// Mark tokens that sit inside a WHERE clause at any nesting level.
fn where_mask(tokens: &[Token]) -> Vec<bool> {
    let mut mask = vec![false; tokens.len()];
    let mut depth = 0i32;
    let mut open_wheres: Vec<i32> = Vec::new();

    for (i, t) in tokens.iter().enumerate() {
        match &t.tok {
            Tok::Sym(s) if s == "(" => depth += 1,
            Tok::Sym(s) if s == ")" => {
                depth -= 1;
                while open_wheres.last().is_some_and(|&d| d > depth) {
                    open_wheres.pop();
                }
            }
            Tok::Sym(s) if s == ";" => open_wheres.clear(),
            Tok::Word(w) if w.eq_ignore_ascii_case("WHERE") => {
                open_wheres.push(depth);
                continue;
            }
            Tok::Word(w) if CLAUSE_ENDS.iter().any(|k| w.eq_ignore_ascii_case(k)) => {
                while open_wheres.last() == Some(&depth) {
                    open_wheres.pop();
                }
            }
            _ => {}
        }
        mask[i] = !open_wheres.is_empty();
    }

    mask
}

// ============ Operands ============

struct Literal {
    value: String,
    span: Range<usize>,
    quoted: bool,
}

impl Literal {
    fn site(self, column: String, op: FilterOp) -> LiteralSite {
        LiteralSite {
            filter: QueryFilter {
                column,
                value: self.value,
            },
            op,
            span: self.span,
            quoted: self.quoted,
        }
    }
}

fn identifier(tok: &Tok) -> Option<&str> {
    match tok {
        Tok::Word(w) if !RESERVED.iter().any(|k| w.eq_ignore_ascii_case(k)) => Some(w.as_str()),
        Tok::Quoted(w) => Some(w.as_str()),
        _ => None,
    }
}

/// `ident ( . ident )*`, returning the last identifier.
fn simple_reference(tokens: &[Token]) -> Option<String> {
    if tokens.len() % 2 == 0 {
        return None;
    }
    for (k, t) in tokens.iter().enumerate() {
        let ok = if k % 2 == 0 {
            identifier(&t.tok).is_some()
        } else {
            is_sym(&t.tok, ".")
        };
        if !ok {
            return None;
        }
    }
    tokens.last().and_then(|t| identifier(&t.tok)).map(str::to_string)
}

fn matching_open(tokens: &[Token], close: usize) -> Option<usize> {
    let mut depth = 0;
    for j in (0..=close).rev() {
        if is_sym(&tokens[j].tok, ")") {
            depth += 1;
        } else if is_sym(&tokens[j].tok, "(") {
            depth -= 1;
            if depth == 0 {
                return Some(j);
            }
        }
    }
    None
}

fn matching_close(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0;
    for (j, t) in tokens.iter().enumerate().skip(open) {
        if is_sym(&t.tok, "(") {
            depth += 1;
        } else if is_sym(&t.tok, ")") {
            depth -= 1;
            if depth == 0 {
                return Some(j);
            }
        }
    }
    None
}

/// Column reference whose last token is `tokens[end]`.
fn column_ending_at(tokens: &[Token], end: usize) -> Option<String> {
    if is_sym(&tokens[end].tok, ")") {
        let open = matching_open(tokens, end)?;
        let func = open.checked_sub(1)?;
        identifier(&tokens[func].tok)?;
        return simple_reference(&tokens[open + 1..end]);
    }
    identifier(&tokens[end].tok)?;
    let mut start = end;
    while start >= 2
        && is_sym(&tokens[start - 1].tok, ".")
        && identifier(&tokens[start - 2].tok).is_some()
    {
        start -= 2;
    }
    simple_reference(&tokens[start..=end])
}

/// Column reference starting at `tokens[start]`.
fn column_starting_at(tokens: &[Token], start: usize) -> Option<String> {
    let first = tokens.get(start)?;
    identifier(&first.tok)?;
    if tokens.get(start + 1).is_some_and(|t| is_sym(&t.tok, "(")) {
        let close = matching_close(tokens, start + 1)?;
        return simple_reference(&tokens[start + 2..close]);
    }
    let mut end = start;
    while tokens.get(end + 1).is_some_and(|t| is_sym(&t.tok, "."))
        && tokens.get(end + 2).is_some_and(|t| identifier(&t.tok).is_some())
    {
        end += 2;
    }
    simple_reference(&tokens[start..=end])
}

/// Column on the left of an `IN`/`LIKE` keyword, skipping `NOT`.
fn left_column(tokens: &[Token], keyword: usize) -> Option<String> {
    let mut j = keyword.checked_sub(1)?;
    if is_word(&tokens[j].tok, "NOT") {
        j = j.checked_sub(1)?;
    }
    column_ending_at(tokens, j)
}

fn bare_literal(tokens: &[Token], at: usize) -> Option<Literal> {
    let t = tokens.get(at)?;
    match &t.tok {
        Tok::Str(v) => Some(Literal {
            value: v.clone(),
            span: t.span.clone(),
            quoted: true,
        }),
        Tok::Num(v) => Some(Literal {
            value: v.clone(),
            span: t.span.clone(),
            quoted: false,
        }),
        _ => None,
    }
}

/// A literal, optionally wrapped in one single-argument function call.
fn literal_at(tokens: &[Token], at: usize) -> Option<Literal> {
    if let Some(lit) = bare_literal(tokens, at) {
        return Some(lit);
    }
    identifier(&tokens.get(at)?.tok)?;
    if !is_sym(&tokens.get(at + 1)?.tok, "(") || !is_sym(&tokens.get(at + 3)?.tok, ")") {
        return None;
    }
    bare_literal(tokens, at + 2)
}

/// `( lit , lit , ... )` starting at `open`. Returns the literals and the
/// index after the closing parenthesis; `None` for subqueries or other
/// non-literal lists.
fn literal_list(tokens: &[Token], open: usize) -> Option<(Vec<Literal>, usize)> {
    if !is_sym(&tokens.get(open)?.tok, "(") {
        return None;
    }
    let mut items = Vec::new();
    let mut k = open + 1;
    loop {
        let t = tokens.get(k)?;
        if is_sym(&t.tok, ")") && items.is_empty() {
            return Some((items, k + 1));
        }
        let lit = literal_at(tokens, k)?;
        k += if bare_literal(tokens, k).is_some() { 1 } else { 4 };
        items.push(lit);
        let sep = tokens.get(k)?;
        if is_sym(&sep.tok, ",") {
            k += 1;
        } else if is_sym(&sep.tok, ")") {
            return Some((items, k + 1));
        } else {
            return None;
        }
    }
}
