//! Similarity and maximal-marginal-relevance retrieval over a [`VectorStore`].
//!
//! The caller embeds the query and passes the vector in; this module has
//! no provider or configuration dependencies.
//!
//! # MMR
//!
//! 1. Fetch `fetch_k` nearest candidates by cosine similarity.
//! 2. Select the candidate most similar to the query.
//! 3. Repeatedly select the candidate maximising
//!    `λ × sim(query, c) − (1 − λ) × max sim(c, selected)`.
//! 4. Stop after `k` selections or when candidates run out.
//!
//! `λ = 1` degenerates to plain similarity ranking; lower values trade
//! top-1 precision for diversity among the `k` results.

use anyhow::{bail, Result};
use std::str::FromStr;

use crate::embedding::cosine_similarity;
use crate::models::MetadataFilter;
use crate::store::{Candidate, VectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    Similarity,
    Mmr,
}

impl FromStr for SearchType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "similarity" => Ok(SearchType::Similarity),
            "mmr" => Ok(SearchType::Mmr),
            other => bail!("Unknown search type: {}. Use similarity or mmr.", other),
        }
    }
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RankParams {
    pub search_type: SearchType,
    /// Number of results to return.
    pub k: usize,
    /// Candidate pool size for MMR.
    pub fetch_k: usize,
    /// Relevance/diversity balance for MMR, in `[0, 1]`.
    pub lambda: f32,
}

impl RankParams {
    pub fn similarity(k: usize) -> Self {
        Self {
            search_type: SearchType::Similarity,
            k,
            fetch_k: k,
            lambda: 1.0,
        }
    }

    pub fn mmr(k: usize) -> Self {
        Self {
            search_type: SearchType::Mmr,
            k,
            fetch_k: 20.max(k),
            lambda: 0.5,
        }
    }
}

/// Retrieve the top `params.k` candidates for `query`.
pub async fn retrieve<S: VectorStore + ?Sized>(
    store: &S,
    query: &[f32],
    params: &RankParams,
    filter: Option<&MetadataFilter>,
) -> Result<Vec<Candidate>> {
    if params.k == 0 {
        return Ok(Vec::new());
    }
    match params.search_type {
        SearchType::Similarity => store.nearest(query, params.k, filter).await,
        SearchType::Mmr => {
            let pool = store
                .nearest(query, params.fetch_k.max(params.k), filter)
                .await?;
            let order = mmr_select(query, &pool, params.k, params.lambda);
            let mut slots: Vec<Option<Candidate>> = pool.into_iter().map(Some).collect();
            Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
        }
    }
}

/// Indices of `candidates` chosen by MMR, in selection order.
pub fn mmr_select(query: &[f32], candidates: &[Candidate], k: usize, lambda: f32) -> Vec<usize> {
    let relevance: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query, &c.vector))
        .collect();

    let mut selected: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (pos, &i) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&j| cosine_similarity(&candidates[i].vector, &candidates[j].vector))
                .fold(f32::NEG_INFINITY, f32::max);
            let redundancy = if selected.is_empty() { 0.0 } else { redundancy };
            let score = lambda * relevance[i] - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }
        selected.push(remaining.remove(best_pos));
    }

    selected
}
