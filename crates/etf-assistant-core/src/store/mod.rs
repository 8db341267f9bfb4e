//! Vector collection abstraction.
//!
//! A [`VectorStore`] is one named collection of [`IndexedEntry`] values
//! with their embeddings, in the spirit of a Chroma collection. Document
//! chunks and catalog values each live in their own collection.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`add`](VectorStore::add) | Insert entries with precomputed vectors |
//! | [`get`](VectorStore::get) | List entries, optionally filtered on one metadata key |
//! | [`delete`](VectorStore::delete) | Remove every entry matching a filter |
//! | [`nearest`](VectorStore::nearest) | Cosine nearest neighbours, best first |
//! | [`reset`](VectorStore::reset) | Drop and recreate the collection |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{IndexedEntry, MetadataFilter};

/// A nearest-neighbour hit with its stored vector.
///
/// The vector is returned so that re-rankers such as MMR can compare
/// candidates with each other without another round-trip.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub entry: IndexedEntry,
    pub vector: Vec<f32>,
    /// Cosine similarity to the query.
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Name of the collection this store is bound to.
    fn collection(&self) -> &str;

    /// Insert entries. `vectors[i]` is the embedding of `entries[i].text`.
    async fn add(&self, entries: &[IndexedEntry], vectors: &[Vec<f32>]) -> Result<()>;

    /// Entries in insertion order, optionally filtered.
    async fn get(&self, filter: Option<&MetadataFilter>) -> Result<Vec<IndexedEntry>>;

    /// Delete all entries matching `filter`, returning the removed entries.
    async fn delete(&self, filter: &MetadataFilter) -> Result<Vec<IndexedEntry>>;

    /// Up to `limit` entries most similar to `query`, best first.
    async fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Candidate>>;

    /// Remove every entry in the collection.
    async fn reset(&self) -> Result<()>;
}

/// Sort candidates by descending score and keep the best `limit`.
pub fn rank_candidates(mut candidates: Vec<Candidate>, limit: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(limit);
    candidates
}
