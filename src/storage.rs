//! Document ingestion and lifecycle.
//!
//! [`DocumentStorage::add_document`] touches three stores in order:
//!
//! | Step | Store | On later failure |
//! |------|-------|------------------|
//! | 1 | blob storage: raw bytes | blob deleted |
//! | 2 | vector index: chunks of the document, skipped when the digest is already indexed | entries deleted when this call added them |
//! | 3 | `etf_docs`: metadata row | - |
//! | 4 | `doc_to_etf`: one row per ETF | duplicates skipped with a warning |
//!
//! There is no transaction across the stores. Compensation is best
//! effort: a failing cleanup is logged and the original error returned.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;

use etf_assistant_core::embedding::Embedder;

use crate::blob::{blob_ref, split_blob_ref, BlobStore};
use crate::chat::DocumentQaChat;
use crate::config::{Config, DocQaConfig};
use crate::digest::{bytes_digest, random_name};
use crate::docs_db::{DocMetadata, DocsDatabase, NewDoc};
use crate::index::{DocumentIndex, SqliteVectorStore};
use crate::llm::ChatModel;
use crate::splitter::{SplitStrategy, SplitterFactory};

/// Upload options for [`DocumentStorage::add_document`].
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub name: String,
    pub description: Option<String>,
    pub split_strategy: SplitStrategy,
    pub multimodal: bool,
    pub top_k: usize,
    pub filter_sources: bool,
    pub etf_isins: Vec<String>,
}

pub struct DocumentStorage {
    docs: DocsDatabase,
    blobs: Arc<dyn BlobStore>,
    bucket: String,
    index: Arc<DocumentIndex>,
    splitters: SplitterFactory,
    model: Arc<dyn ChatModel>,
    docqa: DocQaConfig,
    tmp_dir: PathBuf,
}

/// Open the document collection described by `[docqa]`.
pub fn document_index(
    config: &Config,
    index_pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn ChatModel>,
) -> DocumentIndex {
    let store = Arc::new(SqliteVectorStore::new(index_pool, config.docqa.collection.clone()));
    if config.docqa.is_multimodal() {
        DocumentIndex::multimodal(
            store,
            &config.docstore_dir(),
            embedder,
            model,
            config.docqa.summary_concurrency,
        )
    } else {
        DocumentIndex::plain(store, embedder, model)
    }
}

impl DocumentStorage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        docs: DocsDatabase,
        blobs: Arc<dyn BlobStore>,
        bucket: impl Into<String>,
        index: Arc<DocumentIndex>,
        splitters: SplitterFactory,
        model: Arc<dyn ChatModel>,
        docqa: DocQaConfig,
        tmp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            docs,
            blobs,
            bucket: bucket.into(),
            index,
            splitters,
            model,
            docqa,
            tmp_dir: tmp_dir.into(),
        }
    }

    pub fn docs(&self) -> &DocsDatabase {
        &self.docs
    }

    pub fn index(&self) -> &Arc<DocumentIndex> {
        &self.index
    }

    /// Store, index and register a PDF. Returns the new document id.
    pub async fn add_document(&self, bytes: &[u8], doc: &NewDocument) -> Result<i64> {
        let object = self
            .blobs
            .put(&self.bucket, bytes)
            .await
            .with_context(|| format!("Failed to store '{}' in bucket {}", doc.name, self.bucket))?;
        tracing::info!(name = %doc.name, object = %object, "stored document");

        // Identical bytes are indexed once and shared by every document
        // registered from them.
        let source_id = bytes_digest(bytes);
        let reused = match self.index.contains(&source_id).await {
            Ok(reused) => reused,
            Err(e) => {
                self.discard_blob(&object).await;
                return Err(e);
            }
        };
        if reused {
            tracing::info!(name = %doc.name, source_id = %source_id, "content already indexed, reusing entries");
        } else if let Err(e) = self.index_bytes(bytes, doc).await {
            tracing::error!(name = %doc.name, error = %e, "indexing failed, removing blob");
            self.discard_blob(&object).await;
            return Err(e);
        }

        let bucket_file = blob_ref(&self.bucket, &object);
        let row = NewDoc {
            bucket_file: &bucket_file,
            source_id: &source_id,
            name: &doc.name,
            description: doc.description.as_deref(),
            top_k: doc.top_k,
            filter_sources: doc.filter_sources,
        };
        let doc_id = match self.docs.add_new_doc(&row).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(name = %doc.name, error = %e, "metadata insert failed, compensating");
                if !reused {
                    if let Err(cleanup) = self.index.delete(&source_id).await {
                        tracing::warn!(source_id = %source_id, error = %cleanup, "failed to remove index entries");
                    }
                }
                self.discard_blob(&object).await;
                return Err(e);
            }
        };

        for isin in &doc.etf_isins {
            if self.docs.assign_doc_to_etf(doc_id, isin).await?.is_none() {
                tracing::warn!(doc_id, isin = %isin, "skipped etf");
            }
        }

        tracing::info!(doc_id, source_id = %source_id, "document added");
        Ok(doc_id)
    }

    /// Split and index the bytes through a temporary file.
    async fn index_bytes(&self, bytes: &[u8], doc: &NewDocument) -> Result<()> {
        tokio::fs::create_dir_all(&self.tmp_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.tmp_dir.display()))?;
        let path = self.tmp_dir.join(format!("{}.pdf", random_name(12)));
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        let splitter = self.splitters.build(doc.split_strategy, doc.multimodal);
        let result = self.index.add(&path, splitter.as_ref()).await;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(file = %path.display(), error = %e, "failed to remove temp file");
        }
        result.map(|_| ())
    }

    async fn discard_blob(&self, object: &str) {
        if let Err(e) = self.blobs.delete(&self.bucket, object).await {
            tracing::warn!(bucket = %self.bucket, object, error = %e, "failed to remove blob");
        }
    }

    /// Remove a document everywhere. Returns `false` for unknown ids.
    ///
    /// Index entries are shared by uploads of identical bytes, so they are
    /// kept while another document still references the same source.
    pub async fn delete_document(&self, doc_id: i64) -> Result<bool> {
        let Some(doc) = self.docs.get_doc(doc_id).await? else {
            return Ok(false);
        };

        self.docs.delete_doc(doc_id).await?;

        let shared = self
            .docs
            .get_docs()
            .await?
            .iter()
            .any(|d| d.source_id == doc.source_id);
        if shared {
            tracing::info!(source_id = %doc.source_id, "index entries still referenced, kept");
        } else {
            self.index.delete(&doc.source_id).await?;
        }

        let (bucket, object) = split_blob_ref(&doc.bucket_file)?;
        self.blobs.delete(bucket, object).await?;
        tracing::info!(doc_id, "document deleted");
        Ok(true)
    }

    /// Documents assigned to an ETF together with their bytes.
    pub async fn get_documents(&self, etf_isin: &str) -> Result<Vec<(DocMetadata, Vec<u8>)>> {
        let mut out = Vec::new();
        for doc in self.docs.get_docs_by_etf(etf_isin).await? {
            let (bucket, object) = split_blob_ref(&doc.bucket_file)?;
            let bytes = self.blobs.get(bucket, object).await?;
            out.push((doc, bytes));
        }
        Ok(out)
    }

    /// A chat over one stored document, using its retrieval settings.
    pub async fn open_document_chat(&self, doc_id: i64) -> Result<DocumentQaChat> {
        let doc = self
            .docs
            .get_doc(doc_id)
            .await?
            .with_context(|| format!("Document {} not found", doc_id))?;

        let params = self.docqa.rank_params(doc.top_k)?;
        let retriever = self.index.retriever(params, Some(doc.source_id.clone()));
        Ok(DocumentQaChat::new(
            Arc::new(retriever),
            Arc::clone(&self.model),
            self.docqa.history_turns,
            doc.filter_sources,
        ))
    }
}
