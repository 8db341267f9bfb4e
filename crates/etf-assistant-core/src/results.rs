//! Tabular query results and answer-regime selection for the search chat.
//!
//! | Rows `n` | [`Regime`] | Rows shown to the model | Suggestions |
//! |----------|------------|-------------------------|-------------|
//! | `0` | `NoResults` | none | none |
//! | `1..=max_rows` | `Few` | all | none |
//! | `> max_rows` | `Many` | none, only the count | up to `n_suggestions` |
//!
//! Suggestions are column names whose values differ across the result
//! set, excluding columns that are unique per row by nature (name,
//! ticker), sampled uniformly without replacement.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// A dynamically typed SQL value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl CellValue {
    /// Hashable identity used for distinct counting; `None` for NULL.
    fn distinct_key(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Integer(v) => Some(format!("i{}", v)),
            CellValue::Real(v) => Some(format!("r{}", v.to_bits())),
            CellValue::Text(v) => Some(format!("t{}", v)),
            CellValue::Blob(v) => Some(format!("b{:?}", v)),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Integer(v) => write!(f, "{}", v),
            CellValue::Real(v) => write!(f, "{}", v),
            CellValue::Text(v) => write!(f, "{}", v),
            CellValue::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// Rows returned by a catalog query, with column names.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Keep only the named columns that exist, in result order.
    pub fn project(&self, keep: &[String]) -> ResultSet {
        let idx: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| keep.contains(c))
            .map(|(i, _)| i)
            .collect();
        ResultSet {
            columns: idx.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| idx.iter().map(|&i| r[i].clone()).collect())
                .collect(),
        }
    }

    /// Number of distinct non-NULL values in column `idx`.
    pub fn distinct_count(&self, idx: usize) -> usize {
        self.rows
            .iter()
            .filter_map(|r| r.get(idx).and_then(CellValue::distinct_key))
            .collect::<HashSet<_>>()
            .len()
    }

    /// Render the first `limit` rows as `column: value` lines.
    pub fn render_rows(&self, limit: usize) -> String {
        self.rows
            .iter()
            .take(limit)
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(c, v)| format!("{}: {}", c, v))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    NoResults,
    Few,
    Many,
}

pub fn select_regime(n: usize, max_rows_to_pass: usize) -> Regime {
    if n == 0 {
        Regime::NoResults
    } else if n <= max_rows_to_pass {
        Regime::Few
    } else {
        Regime::Many
    }
}

/// Columns worth asking the user about to narrow a large result set.
pub fn find_suggestions<R: Rng + ?Sized>(
    results: &ResultSet,
    unique_columns: &[String],
    n: usize,
    rng: &mut R,
) -> Vec<String> {
    let differing: Vec<&String> = results
        .columns
        .iter()
        .enumerate()
        .filter(|(i, c)| results.distinct_count(*i) > 1 && !unique_columns.contains(c))
        .map(|(_, c)| c)
        .collect();

    differing
        .choose_multiple(rng, n.min(differing.len()))
        .map(|c| (*c).clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn text(v: &str) -> CellValue {
        CellValue::Text(v.to_string())
    }

    fn sample(n: usize) -> ResultSet {
        ResultSet {
            columns: ["isin", "name", "ticker", "currency", "region", "asset", "replication"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rows: (0..n)
                .map(|i| {
                    vec![
                        text(&format!("IE{:010}", i)),
                        text(&format!("Fund {}", i)),
                        text(&format!("T{}", i)),
                        text(if i % 2 == 0 { "EUR" } else { "USD" }),
                        text(if i % 3 == 0 { "World" } else { "Europe" }),
                        text("Equity"),
                        if i % 2 == 0 { text("Physical") } else { CellValue::Null },
                    ]
                })
                .collect(),
        }
    }

    #[test]
    fn regime_boundaries() {
        assert_eq!(select_regime(0, 3), Regime::NoResults);
        assert_eq!(select_regime(1, 3), Regime::Few);
        assert_eq!(select_regime(3, 3), Regime::Few);
        assert_eq!(select_regime(4, 3), Regime::Many);
    }

    #[test]
    fn suggestions_exclude_unique_and_constant_columns() {
        let unique = vec!["name".to_string(), "ticker".to_string()];
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let s = find_suggestions(&sample(6), &unique, 3, &mut rng);
            assert!(s.len() <= 3);
            for c in &s {
                assert!(!unique.contains(c), "{c}");
                assert_ne!(c, "asset");
                assert_ne!(c, "replication");
            }
            let distinct: HashSet<&String> = s.iter().collect();
            assert_eq!(distinct.len(), s.len());
        }
    }

    #[test]
    fn suggestions_capped_by_candidates() {
        let unique = vec!["name".to_string(), "ticker".to_string()];
        let mut rng = StdRng::seed_from_u64(1);
        let mut s = find_suggestions(&sample(6), &unique, 10, &mut rng);
        s.sort();
        assert_eq!(s, vec!["currency", "isin", "region"]);
    }

    #[test]
    fn project_keeps_result_order() {
        let p = sample(2).project(&["name".to_string(), "isin".to_string(), "missing".to_string()]);
        assert_eq!(p.columns, vec!["isin", "name"]);
        assert_eq!(p.render_rows(1), "isin: IE0000000000, name: Fund 0");
    }
}
