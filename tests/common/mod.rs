//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

use etf_assistant::config::{load_config, Config};
use etf_assistant::db;
use etf_assistant::llm::{ChatModel, ChatRequest, ChatResponse, LlmError};
use etf_assistant::splitter::partition::{Partitioner, RawElement};
use etf_assistant_core::embedding::Embedder;

// ============ Chat model ============

/// Answers from a fixed script, in order, and records every request.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| ChatResponse::text(*t)).collect())
    }

    /// Append text answers to the script.
    pub fn push_texts(&self, texts: &[&str]) {
        self.responses
            .lock()
            .unwrap()
            .extend(texts.iter().map(|t| ChatResponse::text(*t)));
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Text of the last message of request `i`.
    pub fn prompt(&self, i: usize) -> String {
        self.requests.lock().unwrap()[i]
            .messages
            .last()
            .map(|m| m.text())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::Request {
                message: "script exhausted".to_string(),
            })
    }
}

// ============ Embedders ============

const DIMS: usize = 8;

/// Fixed vectors for known texts; other texts get a bag-of-letters vector.
pub struct TableEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl TableEmbedder {
    pub fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            vectors: entries
                .iter()
                .map(|(text, v)| {
                    let mut v = v.clone();
                    v.resize(DIMS, 0.0);
                    (text.to_string(), v)
                })
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self.vectors.get(text) {
            return v.clone();
        }
        let mut v = vec![0.0; DIMS];
        for b in text.to_lowercase().bytes().filter(u8::is_ascii_alphanumeric) {
            v[b as usize % DIMS] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for TableEmbedder {
    fn model_name(&self) -> &str {
        "table"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("embedding provider unavailable")
    }
}

// ============ Partitioner ============

/// Returns the same elements for every file and counts the calls.
pub struct CountingPartitioner {
    elements: Vec<RawElement>,
    calls: AtomicUsize,
}

impl CountingPartitioner {
    pub fn new(elements: Vec<RawElement>) -> Self {
        Self {
            elements,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Partitioner for CountingPartitioner {
    async fn partition(&self, _path: &Path, _extract_images: bool) -> Result<Vec<RawElement>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.elements.clone())
    }
}

pub fn element(kind: &str, text: &str, page: u32) -> RawElement {
    RawElement {
        kind: kind.to_string(),
        text: text.to_string(),
        page,
        image_base64: None,
        image_mime: None,
    }
}

pub fn image_element(page: u32) -> RawElement {
    RawElement {
        kind: "Image".to_string(),
        text: String::new(),
        page,
        // A few JPEG header bytes; never decoded.
        image_base64: Some("/9j/4AAQSkZJRg==".to_string()),
        image_mime: Some("image/jpeg".to_string()),
    }
}

// ============ PDF ============

/// PDF with one line of text per page. The xref table carries the real
/// byte offsets so the text extractor can parse it.
pub fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let n = pages.len();
    let font_id = 3 + 2 * n;
    let mut offsets = Vec::new();
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");

    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");

    let kids: Vec<String> = (0..n).map(|i| format!("{} 0 R", 3 + 2 * i)).collect();
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "2 0 obj << /Type /Pages /Kids [{}] /Count {} >> endobj\n",
            kids.join(" "),
            n
        )
        .as_bytes(),
    );

    for (i, text) in pages.iter().enumerate() {
        let page_id = 3 + 2 * i;
        let content_id = page_id + 1;
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R /Resources << /Font << /F1 {} 0 R >> >> >> endobj\n",
                page_id, content_id, font_id
            )
            .as_bytes(),
        );
        let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", text);
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
                content_id,
                stream.len(),
                stream
            )
            .as_bytes(),
        );
    }

    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "{} 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
            font_id
        )
        .as_bytes(),
    );

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", offsets.len() + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            offsets.len() + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}

// ============ Catalog fixture ============

/// Catalog table with three ETFs: Irish, Luxembourg and German.
pub async fn create_catalog_table(path: &Path) {
    let pool = db::connect(path).await.unwrap();
    let mut conn = pool.acquire().await.unwrap();
    sqlx::query(
        "CREATE TABLE etf_search_data (isin TEXT, name TEXT, ticker TEXT, domicile_country TEXT, currency TEXT)",
    )
    .execute(&mut *conn)
    .await
    .unwrap();
    sqlx::query(
        r#"INSERT INTO etf_search_data VALUES
            ('IE000000001', 'Irish Equity', 'IEQ', 'Ireland', 'EUR'),
            ('LU000000002', 'Lux Bond', 'LXB', 'Luxembourg', 'EUR'),
            ('DE000000003', 'German Equity', 'DEQ', 'Germany', 'EUR')"#,
    )
    .execute(&mut *conn)
    .await
    .unwrap();
    // The app opens the catalog read-only; leave it in rollback-journal mode.
    sqlx::query("PRAGMA journal_mode = DELETE")
        .execute(&mut *conn)
        .await
        .unwrap();
    drop(conn);
    pool.close().await;
}

/// Config over a fresh catalog table in `tmp`, plain document index.
pub async fn setup_config(tmp: &TempDir) -> Config {
    let root = tmp.path();
    create_catalog_table(&root.join("etf.sqlite3")).await;

    let config_path = root.join("etfa.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[paths]
etf_db = "{root}/etf.sqlite3"
docs_db = "{root}/docs.sqlite3"
index_db = "{root}/index.sqlite3"
work_dir = "{root}/work"

[search]
max_rows_to_pass = 2

[catalog]
columns = ["domicile_country", "currency"]

[docqa]
index_mode = "plain"
"#,
            root = root.display()
        ),
    )
    .unwrap();
    load_config(&config_path).unwrap()
}
