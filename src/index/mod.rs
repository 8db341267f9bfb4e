//! Document vector index with an optional side-store.
//!
//! # Modes
//!
//! | Mode | Indexed text | Side-store |
//! |------|--------------|------------|
//! | [`IndexMode::Plain`] | chunk content | none |
//! | [`IndexMode::Multimodal`] | text: content, table: generated summary, image: caption | full chunk for every entry, keyed by `doc_id` |
//!
//! In multimodal mode retrieval resolves every hit through the side-store,
//! so a table is embedded by its summary but answered from its original
//! text. A vector entry whose key has no payload is a [`LookupError`].
//!
//! Deletion is by source identity only: all entries of a document and
//! their payloads go together.

pub mod docstore;
pub mod sqlite_store;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use etf_assistant_core::embedding::Embedder;
use etf_assistant_core::models::{Chunk, ChunkKind, IndexedEntry, MetadataFilter, META_DOC_KEY};
use etf_assistant_core::search::{retrieve, RankParams};
use etf_assistant_core::store::VectorStore;

use crate::chains::summarize::summarize_tables;
use crate::digest::file_digest;
use crate::llm::ChatModel;
use crate::splitter::Splitter;

pub use docstore::FileDocStore;
pub use sqlite_store::SqliteVectorStore;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("side-store has no payload for key {key}")]
    MissingPayload { key: String },
    #[error("indexed entry {id} carries no chunk metadata")]
    MissingMetadata { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    Plain,
    Multimodal,
}

/// Anything that can turn a query into ranked chunks.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<Chunk>>;
}

pub struct DocumentIndex {
    store: Arc<dyn VectorStore>,
    docstore: Option<FileDocStore>,
    embedder: Arc<dyn Embedder>,
    summarizer: Arc<dyn ChatModel>,
    summary_concurrency: usize,
}

impl DocumentIndex {
    /// Plain index: chunks are embedded and returned as they are.
    pub fn plain(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        summarizer: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            store,
            docstore: None,
            embedder,
            summarizer,
            summary_concurrency: 1,
        }
    }

    /// Multimodal index backed by a side-store under `docstore_root`.
    pub fn multimodal(
        store: Arc<dyn VectorStore>,
        docstore_root: &Path,
        embedder: Arc<dyn Embedder>,
        summarizer: Arc<dyn ChatModel>,
        summary_concurrency: usize,
    ) -> Self {
        let root = docstore_root.join(store.collection());
        Self {
            store,
            docstore: Some(FileDocStore::new(root)),
            embedder,
            summarizer,
            summary_concurrency,
        }
    }

    pub fn mode(&self) -> IndexMode {
        if self.docstore.is_some() {
            IndexMode::Multimodal
        } else {
            IndexMode::Plain
        }
    }

    pub fn collection(&self) -> &str {
        self.store.collection()
    }

    /// Split `path` and index its chunks. Returns the source identity.
    pub async fn add(&self, path: &Path, splitter: &dyn Splitter) -> Result<String> {
        let source_id = file_digest(path)?;
        let chunks = splitter
            .split(path)
            .await
            .with_context(|| format!("Failed to split {}", path.display()))?;
        self.add_chunks(&chunks).await?;
        tracing::info!(
            source_id = %source_id,
            chunks = chunks.len(),
            collection = self.collection(),
            "indexed document"
        );
        Ok(source_id)
    }

    pub async fn add_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        match &self.docstore {
            None => {
                let entries: Vec<IndexedEntry> = chunks
                    .iter()
                    .map(|c| IndexedEntry::new(c.content.clone(), c.metadata()))
                    .collect();
                self.embed_and_store(&entries).await
            }
            Some(docstore) => self.add_multimodal(docstore, chunks).await,
        }
    }

    async fn add_multimodal(&self, docstore: &FileDocStore, chunks: &[Chunk]) -> Result<()> {
        let tables: Vec<String> = chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Table)
            .map(|c| c.content.clone())
            .collect();
        let mut summaries = summarize_tables(
            self.summarizer.as_ref(),
            &tables,
            self.summary_concurrency,
        )
        .await?
        .into_iter();

        let mut entries = Vec::with_capacity(chunks.len());
        let mut payloads = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let indexed_text = match &chunk.kind {
                ChunkKind::Table => summaries.next().unwrap_or_default(),
                ChunkKind::Text | ChunkKind::ImageCaption { .. } => chunk.content.clone(),
            };
            let mut entry = IndexedEntry::new(indexed_text, chunk.metadata());
            let key = uuid::Uuid::new_v4().to_string();
            entry.metadata.insert(META_DOC_KEY.to_string(), key.clone());
            entries.push(entry);
            payloads.push((key, chunk.clone()));
        }

        docstore.mset(&payloads)?;
        if let Err(e) = self.embed_and_store(&entries).await {
            let keys: Vec<String> = payloads.into_iter().map(|(k, _)| k).collect();
            if let Err(cleanup) = docstore.mdelete(&keys) {
                tracing::warn!(error = %cleanup, "failed to remove side-store payloads");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn embed_and_store(&self, entries: &[IndexedEntry]) -> Result<()> {
        let texts: Vec<String> = entries.iter().map(|e| e.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        self.store.add(entries, &vectors).await
    }

    /// Whether any entry of `source_id` is indexed.
    pub async fn contains(&self, source_id: &str) -> Result<bool> {
        let entries = self.store.get(Some(&MetadataFilter::source(source_id))).await?;
        Ok(!entries.is_empty())
    }

    /// All chunks of one source (or of the whole collection), resolved.
    pub async fn get(&self, source_id: Option<&str>) -> Result<Vec<Chunk>> {
        let filter = source_id.map(MetadataFilter::source);
        let entries = self.store.get(filter.as_ref()).await?;
        entries.iter().map(|e| self.resolve(e)).collect()
    }

    /// Remove every entry and payload of `source_id`. Returns the number
    /// of removed entries.
    pub async fn delete(&self, source_id: &str) -> Result<usize> {
        let removed = self.store.delete(&MetadataFilter::source(source_id)).await?;
        if let Some(docstore) = &self.docstore {
            let keys: Vec<String> = removed
                .iter()
                .filter_map(|e| e.metadata.get(META_DOC_KEY).cloned())
                .collect();
            docstore.mdelete(&keys)?;
        }
        tracing::info!(source_id, removed = removed.len(), "deleted source data");
        Ok(removed.len())
    }

    /// Drop the whole collection. Meant for tests and rebuilds.
    pub async fn reset(&self) -> Result<()> {
        self.store.reset().await?;
        if let Some(docstore) = &self.docstore {
            docstore.clear()?;
        }
        Ok(())
    }

    /// Top chunks for `query`, optionally scoped to one source.
    pub async fn search(
        &self,
        query: &str,
        params: &RankParams,
        source_id: Option<&str>,
    ) -> Result<Vec<Chunk>> {
        let vector = self.embedder.embed_one(query).await?;
        let filter = source_id.map(MetadataFilter::source);
        let hits = retrieve(self.store.as_ref(), &vector, params, filter.as_ref()).await?;
        hits.iter().map(|c| self.resolve(&c.entry)).collect()
    }

    fn resolve(&self, entry: &IndexedEntry) -> Result<Chunk> {
        if let (Some(docstore), Some(key)) = (&self.docstore, entry.metadata.get(META_DOC_KEY)) {
            return docstore
                .mget(key)?
                .ok_or_else(|| LookupError::MissingPayload { key: key.clone() }.into());
        }
        Chunk::from_metadata(&entry.text, &entry.metadata).ok_or_else(|| {
            LookupError::MissingMetadata {
                id: entry.id.clone(),
            }
            .into()
        })
    }

    /// A retriever bound to this index, one source and fixed ranking.
    pub fn retriever(self: &Arc<Self>, params: RankParams, source_id: Option<String>) -> DocumentRetriever {
        DocumentRetriever {
            index: Arc::clone(self),
            params,
            source_id,
        }
    }
}

pub struct DocumentRetriever {
    index: Arc<DocumentIndex>,
    params: RankParams,
    source_id: Option<String>,
}

#[async_trait]
impl Retriever for DocumentRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<Chunk>> {
        self.index
            .search(query, &self.params, self.source_id.as_deref())
            .await
    }
}
