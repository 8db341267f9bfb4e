//! Wiring of providers, databases and stores from a [`Config`].
//!
//! Both the CLI and the HTTP server build one [`Services`] at startup and
//! open chat sessions from it.

use anyhow::Result;
use std::sync::Arc;

use etf_assistant_core::embedding::Embedder;

use crate::blob::create_blob_store;
use crate::catalog::CorrectionCatalog;
use crate::chains::filter_extraction::{FilterExtractor, LlmExtractor, ParserExtractor};
use crate::chat::{DocumentQaChat, EtfSearchChat};
use crate::config::Config;
use crate::db;
use crate::docs_db::DocsDatabase;
use crate::embedding::create_embedder;
use crate::etf_db::EtfDatabase;
use crate::index::SqliteVectorStore;
use crate::llm::{ChatModel, OpenAiChat};
use crate::migrate::{migrate_docs_db, migrate_index_db};
use crate::splitter::partition::UnstructuredClient;
use crate::splitter::SplitterFactory;
use crate::storage::{document_index, DocumentStorage};

pub struct Services {
    pub config: Arc<Config>,
    pub model: Arc<dyn ChatModel>,
    pub embedder: Arc<dyn Embedder>,
    pub etf_db: Arc<EtfDatabase>,
    pub catalog: Arc<CorrectionCatalog>,
    pub storage: Arc<DocumentStorage>,
}

impl Services {
    pub async fn open(config: &Config) -> Result<Self> {
        let model: Arc<dyn ChatModel> = Arc::new(OpenAiChat::new(&config.llm)?);
        let embedder = create_embedder(&config.embedding)?;
        Self::with_providers(config, model, embedder).await
    }

    /// Like [`Services::open`] with caller-supplied model and embedder.
    pub async fn with_providers(
        config: &Config,
        model: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let etf_db = Arc::new(EtfDatabase::open(&config.paths.etf_db, config.search.table.clone()).await?);

        let index_pool = db::connect(&config.paths.index_db).await?;
        migrate_index_db(&index_pool).await?;

        let catalog = Arc::new(CorrectionCatalog::new(
            Arc::new(SqliteVectorStore::new(
                index_pool.clone(),
                config.catalog.collection.clone(),
            )),
            Arc::clone(&embedder),
            config.catalog.columns.clone(),
            config.catalog.threshold,
        ));

        let docs = DocsDatabase::open(&config.paths.docs_db).await?;
        let index = Arc::new(document_index(
            config,
            index_pool,
            Arc::clone(&embedder),
            Arc::clone(&model),
        ));
        let splitters = SplitterFactory::from_config(
            config,
            Arc::new(UnstructuredClient::new(&config.partition)?),
            Arc::clone(&model),
        );
        let storage = Arc::new(DocumentStorage::new(
            docs,
            create_blob_store(config)?,
            config.blob.bucket.clone(),
            index,
            splitters,
            Arc::clone(&model),
            config.docqa.clone(),
            config.paths.work_dir.join("tmp"),
        ));

        Ok(Self {
            config: Arc::new(config.clone()),
            model,
            embedder,
            etf_db,
            catalog,
            storage,
        })
    }

    pub fn filter_extractor(&self) -> Arc<dyn FilterExtractor> {
        match self.config.search.filter_extractor.as_str() {
            "llm" => Arc::new(LlmExtractor::new(
                Arc::clone(&self.model),
                self.config.search.dialect.clone(),
            )),
            _ => Arc::new(ParserExtractor),
        }
    }

    /// Bring the correction catalog in line with the catalog table.
    pub async fn sync_catalog(&self) -> Result<bool> {
        self.catalog.sync(&self.etf_db).await
    }

    pub async fn search_chat(&self) -> Result<EtfSearchChat> {
        EtfSearchChat::new(
            Arc::clone(&self.model),
            Arc::clone(&self.etf_db),
            Some(Arc::clone(&self.catalog)),
            self.filter_extractor(),
            &self.config.search,
        )
        .await
    }

    pub async fn document_chat(&self, doc_id: i64) -> Result<DocumentQaChat> {
        self.storage.open_document_chat(doc_id).await
    }
}
