use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use etf_assistant_core::search::{RankParams, SearchType};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub docqa: DocQaConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub partition: PartitionConfig,
    #[serde(default)]
    pub blob: BlobConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Catalog database holding the searchable ETF table.
    pub etf_db: PathBuf,
    /// Document metadata database (`etf_docs`, `doc_to_etf`).
    pub docs_db: PathBuf,
    /// Vector collections for documents and the correction catalog.
    pub index_db: PathBuf,
    /// Splitter caches, side-store payloads and backups.
    pub work_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_table")]
    pub table: String,
    #[serde(default = "default_table_description")]
    pub table_description: String,
    #[serde(default = "default_max_rows_to_pass")]
    pub max_rows_to_pass: usize,
    #[serde(default = "default_n_suggestions")]
    pub n_suggestions: usize,
    #[serde(default = "default_columns_to_pass")]
    pub columns_to_pass: Vec<String>,
    #[serde(default = "default_unique_columns")]
    pub unique_columns: Vec<String>,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_dialect")]
    pub dialect: String,
    #[serde(default = "default_true")]
    pub apply_corrections: bool,
    /// `"parser"` (deterministic) or `"llm"` (JSON-mode model call).
    #[serde(default = "default_filter_extractor")]
    pub filter_extractor: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            table: default_search_table(),
            table_description: default_table_description(),
            max_rows_to_pass: default_max_rows_to_pass(),
            n_suggestions: default_n_suggestions(),
            columns_to_pass: default_columns_to_pass(),
            unique_columns: default_unique_columns(),
            history_turns: default_history_turns(),
            dialect: default_dialect(),
            apply_corrections: true,
            filter_extractor: default_filter_extractor(),
        }
    }
}

fn default_search_table() -> String {
    "etf_search_data".to_string()
}
fn default_table_description() -> String {
    crate::chains::prompts::ETF_TABLE_DESCRIPTION.to_string()
}
fn default_max_rows_to_pass() -> usize {
    3
}
fn default_n_suggestions() -> usize {
    3
}
fn default_columns_to_pass() -> Vec<String> {
    vec!["isin".to_string(), "name".to_string()]
}
fn default_unique_columns() -> Vec<String> {
    vec!["name".to_string(), "ticker".to_string()]
}
fn default_history_turns() -> usize {
    5
}
fn default_dialect() -> String {
    "sqlite".to_string()
}
fn default_true() -> bool {
    true
}
fn default_filter_extractor() -> String {
    "parser".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_collection")]
    pub collection: String,
    #[serde(default = "default_catalog_columns")]
    pub columns: Vec<String>,
    #[serde(default = "default_correction_threshold")]
    pub threshold: f32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            collection: default_catalog_collection(),
            columns: default_catalog_columns(),
            threshold: default_correction_threshold(),
        }
    }
}

fn default_catalog_collection() -> String {
    "etf_properties".to_string()
}
fn default_catalog_columns() -> Vec<String> {
    [
        "strategy",
        "domicile_country",
        "currency",
        "dividends",
        "replication",
        "asset",
        "instrument",
        "region",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_correction_threshold() -> f32 {
    0.85
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocQaConfig {
    #[serde(default = "default_docqa_collection")]
    pub collection: String,
    /// `"multimodal"` (side-store indirection) or `"plain"`.
    #[serde(default = "default_index_mode")]
    pub index_mode: String,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_search_type")]
    pub search_type: String,
    #[serde(default = "default_mmr_fetch_k")]
    pub mmr_fetch_k: usize,
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_summary_concurrency")]
    pub summary_concurrency: usize,
    #[serde(default = "default_layout_max_chars")]
    pub layout_max_chars: usize,
    #[serde(default)]
    pub layout_min_chars: usize,
}

impl Default for DocQaConfig {
    fn default() -> Self {
        Self {
            collection: default_docqa_collection(),
            index_mode: default_index_mode(),
            default_top_k: default_top_k(),
            search_type: default_search_type(),
            mmr_fetch_k: default_mmr_fetch_k(),
            mmr_lambda: default_mmr_lambda(),
            history_turns: default_history_turns(),
            summary_concurrency: default_summary_concurrency(),
            layout_max_chars: default_layout_max_chars(),
            layout_min_chars: 0,
        }
    }
}

impl DocQaConfig {
    pub fn is_multimodal(&self) -> bool {
        self.index_mode == "multimodal"
    }

    /// Ranking parameters for a document chat with the given `top_k`.
    pub fn rank_params(&self, top_k: usize) -> Result<RankParams> {
        let search_type: SearchType = self.search_type.parse()?;
        Ok(RankParams {
            search_type,
            k: top_k,
            fetch_k: self.mmr_fetch_k.max(top_k),
            lambda: self.mmr_lambda,
        })
    }
}

fn default_docqa_collection() -> String {
    "documents".to_string()
}
fn default_index_mode() -> String {
    "multimodal".to_string()
}
fn default_top_k() -> usize {
    4
}
fn default_search_type() -> String {
    "mmr".to_string()
}
fn default_mmr_fetch_k() -> usize {
    20
}
fn default_mmr_lambda() -> f32 {
    0.5
}
fn default_summary_concurrency() -> usize {
    5
}
fn default_layout_max_chars() -> usize {
    3000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible or Ollama).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Provider errors propagate unless retries are explicitly enabled.
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: 0,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> Option<String> {
    Some("text-embedding-3-small".to_string())
}
fn default_batch_size() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Model used for image captioning.
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            model: default_llm_model(),
            vision_model: default_vision_model(),
            temperature: None,
            timeout_secs: default_llm_timeout_secs(),
            max_retries: 0,
        }
    }
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_vision_model() -> String {
    "gpt-4o".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct PartitionConfig {
    /// Unstructured-compatible `general` partition endpoint.
    #[serde(default = "default_partition_url")]
    pub url: String,
    #[serde(default = "default_partition_strategy")]
    pub strategy: String,
    #[serde(default = "default_partition_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            url: default_partition_url(),
            strategy: default_partition_strategy(),
            timeout_secs: default_partition_timeout_secs(),
        }
    }
}

fn default_partition_url() -> String {
    "http://localhost:8000/general/v0/general".to_string()
}
fn default_partition_strategy() -> String {
    "hi_res".to_string()
}
fn default_partition_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlobConfig {
    /// `"local"` (directory) or `"s3"` (MinIO / S3, path-style).
    #[serde(default = "default_blob_backend")]
    pub backend: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Root directory for the local backend.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// `host:port` of the S3 endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub secure: bool,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: default_blob_backend(),
            bucket: default_bucket(),
            root: None,
            endpoint: None,
            region: default_region(),
            secure: false,
        }
    }
}

fn default_blob_backend() -> String {
    "local".to_string()
}
fn default_bucket() -> String {
    "etfdocs".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Chat sessions kept per kind; the least recently used is dropped.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Sessions idle for longer are dropped.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_sessions: default_max_sessions(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

fn default_max_sessions() -> usize {
    1000
}

fn default_session_idle_secs() -> u64 {
    3600
}

pub fn load_config(path: &Path) -> Result<Config> {
    // Secrets (OPENAI_API_KEY, BUCKET_KEY, ...) may live in a .env file.
    dotenvy::dotenv().ok();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Search
    if config.search.max_rows_to_pass == 0 {
        anyhow::bail!("search.max_rows_to_pass must be > 0");
    }
    if config.search.columns_to_pass.is_empty() {
        anyhow::bail!("search.columns_to_pass must not be empty");
    }
    match config.search.filter_extractor.as_str() {
        "parser" | "llm" => {}
        other => anyhow::bail!(
            "Unknown search.filter_extractor: '{}'. Must be parser or llm.",
            other
        ),
    }

    // Catalog
    if !(config.catalog.threshold > 0.0 && config.catalog.threshold <= 1.0) {
        anyhow::bail!("catalog.threshold must be in (0.0, 1.0]");
    }

    // Document QA
    if config.docqa.default_top_k == 0 {
        anyhow::bail!("docqa.default_top_k must be >= 1");
    }
    if config.docqa.summary_concurrency == 0 {
        anyhow::bail!("docqa.summary_concurrency must be >= 1");
    }
    if config.docqa.layout_min_chars > config.docqa.layout_max_chars {
        anyhow::bail!("docqa.layout_min_chars must be <= docqa.layout_max_chars");
    }
    if !(0.0..=1.0).contains(&config.docqa.mmr_lambda) {
        anyhow::bail!("docqa.mmr_lambda must be in [0.0, 1.0]");
    }
    config.docqa.search_type.parse::<SearchType>()?;
    match config.docqa.index_mode.as_str() {
        "multimodal" | "plain" => {}
        other => anyhow::bail!(
            "Unknown docqa.index_mode: '{}'. Must be multimodal or plain.",
            other
        ),
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    // Blob storage
    match config.blob.backend.as_str() {
        "local" => {}
        "s3" => {
            if config.blob.endpoint.is_none() {
                anyhow::bail!("blob.endpoint must be set when backend is 's3'");
            }
        }
        other => anyhow::bail!(
            "Unknown blob backend: '{}'. Must be local or s3.",
            other
        ),
    }

    // Server
    if config.server.max_sessions == 0 {
        anyhow::bail!("server.max_sessions must be > 0");
    }

    Ok(())
}

impl Config {
    /// Directory for the local blob backend.
    pub fn blob_root(&self) -> PathBuf {
        self.blob
            .root
            .clone()
            .unwrap_or_else(|| self.paths.work_dir.join("blobs"))
    }

    pub fn splitter_cache_dir(&self) -> PathBuf {
        self.paths.work_dir.join("splitters_cache")
    }

    pub fn docstore_dir(&self) -> PathBuf {
        self.paths.work_dir.join("file_stores")
    }
}
