//! Document-layout partitioning.
//!
//! [`UnstructuredClient`] posts the PDF to an Unstructured-compatible
//! `general` endpoint and returns its elements. Image regions come back
//! with their pixels as a base64 payload so the layout splitter can
//! write them next to its cache.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::config::PartitionConfig;

/// Element types whose pixels are requested from the partitioner.
pub const IMAGE_BLOCK_TYPES: [&str; 3] = ["Image", "Picture", "Figure"];

/// One partitioner element as returned on the wire.
///
/// `kind` is kept as the raw type string; it is parsed into an
/// `ElementKind` at split time so unsupported types fail loudly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawElement {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
    pub page: u32,
    #[serde(skip)]
    pub image_base64: Option<String>,
    #[serde(skip)]
    pub image_mime: Option<String>,
}

#[async_trait]
pub trait Partitioner: Send + Sync {
    async fn partition(&self, path: &Path, extract_images: bool) -> Result<Vec<RawElement>>;
}

pub struct UnstructuredClient {
    url: String,
    strategy: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl UnstructuredClient {
    /// `UNSTRUCTURED_API_KEY` is sent when set.
    pub fn new(config: &PartitionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            url: config.url.clone(),
            strategy: config.strategy.clone(),
            api_key: std::env::var("UNSTRUCTURED_API_KEY").ok(),
            client,
        })
    }
}

#[async_trait]
impl Partitioner for UnstructuredClient {
    async fn partition(&self, path: &Path, extract_images: bool) -> Result<Vec<RawElement>> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "document.pdf".to_string());

        let file_part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/pdf")?;
        let mut form = reqwest::multipart::Form::new()
            .part("files", file_part)
            .text("strategy", self.strategy.clone())
            .text("pdf_infer_table_structure", "true");
        if extract_images {
            form = form.text(
                "extract_image_block_types",
                serde_json::to_string(&IMAGE_BLOCK_TYPES)?,
            );
        }

        let mut request = self
            .client
            .post(&self.url)
            .header("Accept", "application/json")
            .multipart(form);
        if let Some(key) = &self.api_key {
            request = request.header("unstructured-api-key", key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Partition request to {} failed", self.url))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Partition API error {}: {}", status, body);
        }

        let json: serde_json::Value = response.json().await?;
        parse_elements(&json)
    }
}

fn parse_elements(json: &serde_json::Value) -> Result<Vec<RawElement>> {
    let items = json
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Invalid partition response: expected an array"))?;

    items
        .iter()
        .map(|item| {
            let kind = item
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow::anyhow!("Invalid partition response: element without type"))?;
            let meta = item.get("metadata");
            let page = meta
                .and_then(|m| m.get("page_number"))
                .and_then(|p| p.as_u64())
                .unwrap_or(1) as u32;
            let str_meta = |key: &str| {
                meta.and_then(|m| m.get(key))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
            };
            Ok(RawElement {
                kind: kind.to_string(),
                text: item
                    .get("text")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string(),
                page,
                image_base64: str_meta("image_base64"),
                image_mime: str_meta("image_mime_type"),
            })
        })
        .collect()
}
