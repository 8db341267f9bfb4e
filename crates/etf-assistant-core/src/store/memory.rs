//! In-memory [`VectorStore`] for tests and ephemeral sessions.
//!
//! Entries live in a `Vec` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity over every stored vector.

use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{IndexedEntry, MetadataFilter};

use super::{rank_candidates, Candidate, VectorStore};

struct StoredEntry {
    entry: IndexedEntry,
    vector: Vec<f32>,
}

pub struct InMemoryVectorStore {
    collection: String,
    entries: RwLock<Vec<StoredEntry>>,
}

impl InMemoryVectorStore {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn add(&self, entries: &[IndexedEntry], vectors: &[Vec<f32>]) -> Result<()> {
        if entries.len() != vectors.len() {
            bail!(
                "{} entries but {} vectors for collection '{}'",
                entries.len(),
                vectors.len(),
                self.collection
            );
        }
        let mut stored = self.entries.write().unwrap();
        for (entry, vector) in entries.iter().zip(vectors) {
            stored.push(StoredEntry {
                entry: entry.clone(),
                vector: vector.clone(),
            });
        }
        Ok(())
    }

    async fn get(&self, filter: Option<&MetadataFilter>) -> Result<Vec<IndexedEntry>> {
        let stored = self.entries.read().unwrap();
        Ok(stored
            .iter()
            .filter(|s| filter.map_or(true, |f| f.matches(&s.entry.metadata)))
            .map(|s| s.entry.clone())
            .collect())
    }

    async fn delete(&self, filter: &MetadataFilter) -> Result<Vec<IndexedEntry>> {
        let mut stored = self.entries.write().unwrap();
        let (removed, kept): (Vec<_>, Vec<_>) = stored
            .drain(..)
            .partition(|s| filter.matches(&s.entry.metadata));
        *stored = kept;
        Ok(removed.into_iter().map(|s| s.entry).collect())
    }

    async fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Candidate>> {
        let stored = self.entries.read().unwrap();
        let candidates = stored
            .iter()
            .filter(|s| filter.map_or(true, |f| f.matches(&s.entry.metadata)))
            .map(|s| Candidate {
                entry: s.entry.clone(),
                vector: s.vector.clone(),
                score: cosine_similarity(query, &s.vector),
            })
            .collect();
        Ok(rank_candidates(candidates, limit))
    }

    async fn reset(&self) -> Result<()> {
        self.entries.write().unwrap().clear();
        Ok(())
    }
}
