//! Correction catalog for categorical filter values.
//!
//! The catalog mirrors the distinct values of a fixed set of columns into
//! a vector collection, one entry per `(column, value)` with the column
//! stored under the `column` metadata key.
//!
//! # Staleness
//!
//! [`CorrectionCatalog::sync`] compares, for every tracked column, the set
//! of values in the catalog table with the set currently indexed. Any
//! difference (added, removed or renamed category) rebuilds the whole
//! collection.
//!
//! # Lookup
//!
//! [`CorrectionCatalog::get_correction`] embeds the candidate value, takes
//! the single nearest entry of the same column and returns its text when
//! the cosine similarity is strictly above the threshold.

use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::Arc;

use etf_assistant_core::embedding::Embedder;
use etf_assistant_core::models::{IndexedEntry, Metadata, MetadataFilter};
use etf_assistant_core::store::VectorStore;

use crate::etf_db::EtfDatabase;

pub const META_COLUMN: &str = "column";

/// Whether a nearest-neighbour similarity is good enough to correct.
pub fn accept_correction(score: f32, threshold: f32) -> bool {
    score > threshold
}

pub struct CorrectionCatalog {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    columns: Vec<String>,
    threshold: f32,
}

impl CorrectionCatalog {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        columns: Vec<String>,
        threshold: f32,
    ) -> Self {
        Self {
            store,
            embedder,
            columns,
            threshold,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn tracks(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }

    /// Rebuild the collection if any tracked column drifted. Returns
    /// `true` when a rebuild happened.
    pub async fn sync(&self, db: &EtfDatabase) -> Result<bool> {
        let mut live: Vec<(String, Vec<String>)> = Vec::with_capacity(self.columns.len());
        let mut out_of_date = false;

        for column in &self.columns {
            let values = db.distinct_values(column).await?;
            let indexed: BTreeSet<String> = self
                .store
                .get(Some(&MetadataFilter::new(META_COLUMN, column.as_str())))
                .await?
                .into_iter()
                .map(|e| e.text)
                .collect();
            let current: BTreeSet<String> = values.iter().cloned().collect();
            if indexed != current {
                tracing::debug!(
                    column = %column,
                    indexed = indexed.len(),
                    current = current.len(),
                    "catalog column drifted"
                );
                out_of_date = true;
            }
            live.push((column.clone(), values));
        }

        if !out_of_date {
            return Ok(false);
        }

        tracing::info!(collection = self.store.collection(), "catalog out of date, rebuilding");
        self.store.reset().await?;

        let mut entries = Vec::new();
        for (column, values) in live {
            for value in values {
                let mut meta = Metadata::new();
                meta.insert(META_COLUMN.to_string(), column.clone());
                entries.push(IndexedEntry::new(value, meta));
            }
        }
        if !entries.is_empty() {
            let texts: Vec<String> = entries.iter().map(|e| e.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            self.store.add(&entries, &vectors).await?;
        }
        tracing::info!(values = entries.len(), "catalog rebuilt");
        Ok(true)
    }

    /// Canonical value for `value` in `column`, if one is close enough.
    pub async fn get_correction(&self, column: &str, value: &str) -> Result<Option<String>> {
        let Some(tracked) = self.columns.iter().find(|c| c.eq_ignore_ascii_case(column)) else {
            return Ok(None);
        };
        let query = self.embedder.embed_one(value).await?;
        let hits = self
            .store
            .nearest(&query, 1, Some(&MetadataFilter::new(META_COLUMN, tracked.as_str())))
            .await?;

        Ok(hits
            .into_iter()
            .next()
            .filter(|hit| accept_correction(hit.score, self.threshold))
            .map(|hit| hit.entry.text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_strict() {
        assert!(!accept_correction(0.85, 0.85));
        assert!(!accept_correction(0.80, 0.85));
        assert!(accept_correction(0.86, 0.85));
    }
}
