//! Document pipeline: splitters, the vector index and side-store, the
//! document chat and ingestion with compensation.

mod common;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use common::{
    element, image_element, pdf_with_pages, CountingPartitioner, FailingEmbedder, ScriptedModel,
    TableEmbedder,
};
use etf_assistant::blob::LocalBlobStore;
use etf_assistant::chat::DocumentQaChat;
use etf_assistant::config::DocQaConfig;
use etf_assistant::db;
use etf_assistant::docs_db::DocsDatabase;
use etf_assistant::index::{DocumentIndex, FileDocStore, LookupError, Retriever};
use etf_assistant::splitter::layout::{LayoutOptions, LayoutSplitter};
use etf_assistant::splitter::page::PageSplitter;
use etf_assistant::splitter::{SplitStrategy, Splitter, SplitterFactory};
use etf_assistant::storage::{DocumentStorage, NewDocument};
use etf_assistant_core::embedding::Embedder;
use etf_assistant_core::models::{Chunk, ChunkKind};
use etf_assistant_core::search::RankParams;
use etf_assistant_core::store::memory::InMemoryVectorStore;

const PAGES: [&str; 3] = ["Fund overview", "Fees and costs", "Risk indicator"];

fn write_pdf(dir: &Path) -> PathBuf {
    let path = dir.join("factsheet.pdf");
    std::fs::write(&path, pdf_with_pages(&PAGES)).unwrap();
    path
}

// ============ Splitters ============

#[tokio::test]
async fn page_splitter_yields_one_chunk_per_page() {
    let tmp = TempDir::new().unwrap();
    let path = write_pdf(tmp.path());

    let chunks = PageSplitter::new().split(&path).await.unwrap();

    assert_eq!(chunks.len(), PAGES.len());
    let pages: Vec<u32> = chunks.iter().map(|c| c.page).collect();
    assert_eq!(pages, vec![1, 2, 3]);
    assert!(chunks[1].content.contains("Fees and costs"));
    assert!(chunks.iter().all(|c| c.kind == ChunkKind::Text));
    assert!(chunks.iter().all(|c| c.source_id == chunks[0].source_id));
}

fn layout_elements() -> Vec<etf_assistant::splitter::partition::RawElement> {
    vec![
        element("Title", "Fund overview", 1),
        element("NarrativeText", "The fund tracks the MSCI World index.", 1),
        element("PageBreak", "", 1),
        element("Table", "TER | 0.20%", 2),
        element("NarrativeText", "Risk class 4 of 7.", 2),
    ]
}

fn layout_splitter(
    partitioner: Arc<CountingPartitioner>,
    model: Arc<ScriptedModel>,
    cache: &Path,
    extract_images: bool,
    force_refresh: bool,
) -> LayoutSplitter {
    LayoutSplitter::new(
        partitioner,
        model,
        "vision",
        cache,
        LayoutOptions {
            max_chars: 3000,
            min_chars: 0,
            extract_images,
            filter_captions: extract_images,
            force_refresh,
        },
    )
}

#[tokio::test]
async fn layout_split_reuses_cached_partition() {
    let tmp = TempDir::new().unwrap();
    let path = write_pdf(tmp.path());
    let cache = tmp.path().join("cache");
    let partitioner = Arc::new(CountingPartitioner::new(layout_elements()));
    let model = Arc::new(ScriptedModel::new(Vec::new()));

    let splitter = layout_splitter(Arc::clone(&partitioner), Arc::clone(&model), &cache, false, false);
    let first = splitter.split(&path).await.unwrap();
    let second = splitter.split(&path).await.unwrap();

    assert_eq!(partitioner.calls(), 1);
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
    assert_eq!(first[0].content, "Fund overview\n\nThe fund tracks the MSCI World index.");
    assert_eq!(first[1].kind, ChunkKind::Table);
    assert_eq!(first[1].page, 2);
    assert!(model.requests().is_empty());

    // A fresh splitter over the same cache directory does not partition again.
    let again = layout_splitter(Arc::clone(&partitioner), model, &cache, false, false);
    assert_eq!(again.split(&path).await.unwrap(), first);
    assert_eq!(partitioner.calls(), 1);
}

#[tokio::test]
async fn force_refresh_backs_up_the_cache() {
    let tmp = TempDir::new().unwrap();
    let path = write_pdf(tmp.path());
    let cache = tmp.path().join("cache");
    let partitioner = Arc::new(CountingPartitioner::new(layout_elements()));
    let model = Arc::new(ScriptedModel::new(Vec::new()));

    layout_splitter(Arc::clone(&partitioner), Arc::clone(&model), &cache, false, false)
        .split(&path)
        .await
        .unwrap();
    layout_splitter(Arc::clone(&partitioner), model, &cache, false, true)
        .split(&path)
        .await
        .unwrap();

    assert_eq!(partitioner.calls(), 2);
    let backups: Vec<_> = std::fs::read_dir(cache.join("backup")).unwrap().collect();
    assert_eq!(backups.len(), 1);
}

#[tokio::test]
async fn unknown_element_type_fails_the_split() {
    let tmp = TempDir::new().unwrap();
    let path = write_pdf(tmp.path());
    let partitioner = Arc::new(CountingPartitioner::new(vec![element("Hologram", "?", 1)]));
    let model = Arc::new(ScriptedModel::new(Vec::new()));

    let splitter = layout_splitter(partitioner, model, &tmp.path().join("cache"), false, false);
    let err = splitter.split(&path).await.unwrap_err();
    assert!(format!("{:#}", err).contains("Hologram"));
}

#[tokio::test]
async fn captions_are_filtered_and_cached() {
    let tmp = TempDir::new().unwrap();
    let path = write_pdf(tmp.path());
    let cache = tmp.path().join("cache");
    let mut elements = layout_elements();
    elements.push(image_element(2));
    elements.push(image_element(3));
    let partitioner = Arc::new(CountingPartitioner::new(elements));
    // Captions are generated in image-name order, then filtered.
    let model = Arc::new(ScriptedModel::texts(&[
        "Bar chart of annual returns",
        "Company logo",
        "YES",
        "NO",
    ]));

    let splitter = layout_splitter(Arc::clone(&partitioner), Arc::clone(&model), &cache, true, false);
    let chunks = splitter.split(&path).await.unwrap();

    let captions: Vec<&Chunk> = chunks
        .iter()
        .filter(|c| matches!(c.kind, ChunkKind::ImageCaption { .. }))
        .collect();
    assert_eq!(captions.len(), 1);
    assert_eq!(captions[0].page, 2);
    assert_eq!(captions[0].content, "Bar chart of annual returns");
    assert_eq!(model.remaining(), 0);

    // Everything comes from the cache the second time.
    let again = layout_splitter(partitioner, Arc::clone(&model), &cache, true, false);
    assert_eq!(again.split(&path).await.unwrap(), chunks);
    assert_eq!(model.requests().len(), 4);
}

// ============ Index ============

fn plain_index(embedder: Arc<dyn Embedder>, model: Arc<ScriptedModel>) -> DocumentIndex {
    DocumentIndex::plain(Arc::new(InMemoryVectorStore::new("documents")), embedder, model)
}

#[tokio::test]
async fn delete_removes_only_the_given_source() {
    let index = plain_index(
        Arc::new(TableEmbedder::new(&[])),
        Arc::new(ScriptedModel::new(Vec::new())),
    );
    index
        .add_chunks(&[Chunk::text("a", 1, "alpha one"), Chunk::text("a", 2, "alpha two")])
        .await
        .unwrap();
    index
        .add_chunks(&[Chunk::text("b", 1, "beta one")])
        .await
        .unwrap();

    assert_eq!(index.delete("a").await.unwrap(), 2);

    let left = index.get(None).await.unwrap();
    assert_eq!(left, vec![Chunk::text("b", 1, "beta one")]);
    assert!(index.get(Some("a")).await.unwrap().is_empty());
}

#[tokio::test]
async fn multimodal_index_answers_tables_from_the_original_text() {
    let tmp = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::texts(&["Ongoing charges of the fund"]));
    let index = DocumentIndex::multimodal(
        Arc::new(InMemoryVectorStore::new("documents")),
        tmp.path(),
        Arc::new(TableEmbedder::new(&[])),
        Arc::clone(&model) as Arc<dyn etf_assistant::llm::ChatModel>,
        2,
    );
    let table = Chunk::table("doc", 2, "TER | 0.20%");
    index
        .add_chunks(&[Chunk::text("doc", 1, "The fund tracks the MSCI World."), table.clone()])
        .await
        .unwrap();

    assert!(model.prompt(0).contains("TER | 0.20%"));
    let hits = index
        .search("ongoing charges", &RankParams::similarity(5), Some("doc"))
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.contains(&table));

    // Without its payload a hit cannot be resolved.
    FileDocStore::new(tmp.path().join("documents")).clear().unwrap();
    let err = index.get(Some("doc")).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LookupError>(),
        Some(LookupError::MissingPayload { .. })
    ));
}

// ============ Document chat ============

struct FixedRetriever(Vec<Chunk>);

#[async_trait]
impl Retriever for FixedRetriever {
    async fn retrieve(&self, _query: &str) -> anyhow::Result<Vec<Chunk>> {
        Ok(self.0.clone())
    }
}

fn retrieved() -> Arc<FixedRetriever> {
    Arc::new(FixedRetriever(vec![
        Chunk::text("doc", 1, "The fund tracks the MSCI World."),
        Chunk::table("doc", 2, "TER | 0.20%"),
    ]))
}

#[tokio::test]
async fn document_chat_keeps_relevant_sources() {
    let model = Arc::new(ScriptedModel::texts(&[
        "What is the TER of the fund?",
        "The TER is 0.20%.",
        "NO",
        "YES",
    ]));
    let mut chat = DocumentQaChat::new(retrieved(), Arc::clone(&model) as _, 5, true);

    let reply = chat.chat("and its TER?").await.unwrap();

    assert_eq!(reply.answer, "The TER is 0.20%.");
    assert_eq!(reply.sources["doc"].iter().copied().collect::<Vec<_>>(), vec![2]);
    assert_eq!(chat.memory().len(), 1);

    // The answering call sees the retrieved context.
    let answer_request = &model.requests()[1];
    let context = answer_request.messages.last().unwrap().text();
    assert!(context.contains("The fund tracks the MSCI World.\n\nTER | 0.20%"));
}

#[tokio::test]
async fn first_source_survives_when_none_is_relevant() {
    let model = Arc::new(ScriptedModel::texts(&["q", "I don't know.", "NO", "NO"]));
    let mut chat = DocumentQaChat::new(retrieved(), model as _, 5, true);

    let reply = chat.chat("q").await.unwrap();
    assert_eq!(reply.sources["doc"].iter().copied().collect::<Vec<_>>(), vec![1]);
}

#[tokio::test]
async fn malformed_verdict_is_an_error() {
    let model = Arc::new(ScriptedModel::texts(&["q", "answer", "Maybe"]));
    let mut chat = DocumentQaChat::new(retrieved(), model as _, 5, true);
    assert!(chat.chat("q").await.is_err());
}

#[tokio::test]
async fn unfiltered_chat_returns_every_page() {
    let model = Arc::new(ScriptedModel::texts(&["q", "answer"]));
    let mut chat = DocumentQaChat::new(retrieved(), Arc::clone(&model) as _, 5, false);

    let reply = chat.chat("q").await.unwrap();
    assert_eq!(reply.sources["doc"].len(), 2);
    assert_eq!(model.requests().len(), 2);
}

// ============ Ingestion ============

struct Fixture {
    _tmp: TempDir,
    root: PathBuf,
    model: Arc<ScriptedModel>,
    storage: DocumentStorage,
}

impl Fixture {
    async fn new(embedder: Arc<dyn Embedder>) -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        let model = Arc::new(ScriptedModel::new(Vec::new()));

        let docs = DocsDatabase::open(&root.join("docs.sqlite3")).await.unwrap();
        let index = Arc::new(plain_index(embedder, Arc::clone(&model)));
        let splitters = SplitterFactory::new(
            Arc::new(CountingPartitioner::new(layout_elements())),
            Arc::clone(&model) as _,
            "vision",
            root.join("cache"),
            3000,
            0,
        );
        let storage = DocumentStorage::new(
            docs,
            Arc::new(LocalBlobStore::new(root.join("blobs"))),
            "etfdocs",
            index,
            splitters,
            Arc::clone(&model) as _,
            DocQaConfig::default(),
            root.join("tmp"),
        );
        Self {
            _tmp: tmp,
            root,
            model,
            storage,
        }
    }

    fn blob_count(&self) -> usize {
        match std::fs::read_dir(self.root.join("blobs").join("etfdocs")) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    fn tmp_count(&self) -> usize {
        match std::fs::read_dir(self.root.join("tmp")) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

fn upload(strategy: SplitStrategy, etfs: &[&str]) -> NewDocument {
    NewDocument {
        name: "MSCI World factsheet".to_string(),
        description: Some("Monthly factsheet".to_string()),
        split_strategy: strategy,
        multimodal: false,
        top_k: 2,
        filter_sources: false,
        etf_isins: etfs.iter().map(|s| s.to_string()).collect(),
    }
}

#[tokio::test]
async fn add_list_chat_and_delete_a_document() {
    let fx = Fixture::new(Arc::new(TableEmbedder::new(&[]))).await;
    let bytes = pdf_with_pages(&PAGES);

    let doc_id = fx
        .storage
        .add_document(
            &bytes,
            &upload(SplitStrategy::ByPage, &["IE000000001", "IE000000001", "LU000000002"]),
        )
        .await
        .unwrap();

    let docs = fx.storage.docs();
    assert_eq!(
        docs.get_doc_etfs(doc_id).await.unwrap(),
        vec!["IE000000001", "LU000000002"]
    );
    let doc = docs.get_doc(doc_id).await.unwrap().unwrap();
    assert_eq!(doc.top_k, 2);
    assert!(doc.bucket_file.starts_with("etfdocs/"));
    assert_eq!(fx.blob_count(), 1);
    assert_eq!(fx.tmp_count(), 0);
    assert_eq!(fx.storage.index().get(Some(&doc.source_id)).await.unwrap().len(), 3);

    let stored = fx.storage.get_documents("IE000000001").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].1, bytes);
    assert!(fx.storage.get_documents("FR000000009").await.unwrap().is_empty());

    fx.model.push_texts(&["What are the fees?", "The TER is 0.20%."]);
    let mut chat = fx.storage.open_document_chat(doc_id).await.unwrap();
    let reply = chat.chat("What are the fees?").await.unwrap();
    assert_eq!(reply.answer, "The TER is 0.20%.");
    // top_k of the document bounds the retrieved pages.
    let pages = &reply.sources[&doc.source_id];
    assert!(!pages.is_empty() && pages.len() <= 2);

    assert!(fx.storage.delete_document(doc_id).await.unwrap());
    assert_eq!(fx.blob_count(), 0);
    assert!(fx.storage.index().get(None).await.unwrap().is_empty());
    assert!(docs.get_docs().await.unwrap().is_empty());
    assert!(docs.get_docs_by_etf("IE000000001").await.unwrap().is_empty());
    assert!(!fx.storage.delete_document(doc_id).await.unwrap());
}

#[tokio::test]
async fn failed_indexing_removes_the_blob() {
    let fx = Fixture::new(Arc::new(FailingEmbedder)).await;

    let err = fx
        .storage
        .add_document(&pdf_with_pages(&PAGES), &upload(SplitStrategy::ByPage, &["IE000000001"]))
        .await
        .unwrap_err();

    assert!(format!("{:#}", err).contains("embedding provider unavailable"));
    assert_eq!(fx.blob_count(), 0);
    assert_eq!(fx.tmp_count(), 0);
    assert!(fx.storage.docs().get_docs().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_registration_removes_blob_and_index_entries() {
    let fx = Fixture::new(Arc::new(TableEmbedder::new(&[]))).await;
    let pool = db::connect(&fx.root.join("docs.sqlite3")).await.unwrap();
    sqlx::query("DROP TABLE etf_docs").execute(&pool).await.unwrap();

    let result = fx
        .storage
        .add_document(&pdf_with_pages(&PAGES), &upload(SplitStrategy::ByLayout, &[]))
        .await;

    assert!(result.is_err());
    assert_eq!(fx.blob_count(), 0);
    assert!(fx.storage.index().get(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn identical_uploads_share_index_entries_until_the_last_delete() {
    let fx = Fixture::new(Arc::new(TableEmbedder::new(&[]))).await;
    let bytes = pdf_with_pages(&PAGES);

    let first = fx
        .storage
        .add_document(&bytes, &upload(SplitStrategy::ByLayout, &[]))
        .await
        .unwrap();
    let second = fx
        .storage
        .add_document(&bytes, &upload(SplitStrategy::ByLayout, &[]))
        .await
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(fx.blob_count(), 2);

    assert!(fx.storage.delete_document(first).await.unwrap());
    assert!(!fx.storage.index().get(None).await.unwrap().is_empty());
    assert!(fx.storage.open_document_chat(second).await.is_ok());

    assert!(fx.storage.delete_document(second).await.unwrap());
    assert!(fx.storage.index().get(None).await.unwrap().is_empty());
    assert_eq!(fx.blob_count(), 0);
}

#[tokio::test]
async fn identical_bytes_are_indexed_once() {
    let embedder = Arc::new(TableEmbedder::new(&[]));
    let fx = Fixture::new(Arc::clone(&embedder) as _).await;
    let bytes = pdf_with_pages(&PAGES);

    let first = fx
        .storage
        .add_document(&bytes, &upload(SplitStrategy::ByPage, &[]))
        .await
        .unwrap();
    let entries = fx.storage.index().get(None).await.unwrap().len();
    let embed_calls = embedder.calls();
    assert_eq!(entries, PAGES.len());

    let mut renamed = upload(SplitStrategy::ByPage, &[]);
    renamed.name = "MSCI World factsheet (copy)".to_string();
    let second = fx.storage.add_document(&bytes, &renamed).await.unwrap();

    assert_ne!(first, second);
    assert_eq!(fx.storage.index().get(None).await.unwrap().len(), entries);
    assert_eq!(embedder.calls(), embed_calls);
    assert_eq!(fx.blob_count(), 2);

    let source_id = fx.storage.docs().get_doc(second).await.unwrap().unwrap().source_id;
    let hits = fx
        .storage
        .index()
        .search("Fees and costs", &RankParams::similarity(2), Some(&source_id))
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_ne!(hits[0].page, hits[1].page);
}

#[tokio::test]
async fn failed_registration_keeps_entries_of_an_identical_document() {
    let fx = Fixture::new(Arc::new(TableEmbedder::new(&[]))).await;
    let bytes = pdf_with_pages(&PAGES);
    let first = fx
        .storage
        .add_document(&bytes, &upload(SplitStrategy::ByPage, &[]))
        .await
        .unwrap();
    let source_id = fx.storage.docs().get_doc(first).await.unwrap().unwrap().source_id;

    let pool = db::connect(&fx.root.join("docs.sqlite3")).await.unwrap();
    sqlx::query(
        "CREATE TRIGGER reject_docs BEFORE INSERT ON etf_docs \
         BEGIN SELECT RAISE(ABORT, 'registration rejected'); END",
    )
    .execute(&pool)
    .await
    .unwrap();

    let result = fx
        .storage
        .add_document(&bytes, &upload(SplitStrategy::ByPage, &[]))
        .await;

    assert!(result.is_err());
    assert_eq!(fx.blob_count(), 1);
    assert_eq!(fx.storage.docs().get_docs().await.unwrap().len(), 1);
    assert_eq!(
        fx.storage.index().get(Some(&source_id)).await.unwrap().len(),
        PAGES.len()
    );
    let hits = fx
        .storage
        .index()
        .search("Fees and costs", &RankParams::similarity(1), Some(&source_id))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn chat_over_unknown_document_fails() {
    let fx = Fixture::new(Arc::new(TableEmbedder::new(&[]))).await;
    let err = fx.storage.open_document_chat(42).await.err().unwrap();
    assert_eq!(err.to_string(), "Document 42 not found");
}
