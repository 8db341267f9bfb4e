//! One text chunk per PDF page.
//!
//! Pages are numbered from 1 and every page yields a chunk, blank pages
//! included, so the chunk count always equals the page count. When
//! built with [`PageSplitter::with_images`], caption chunks for the
//! document's relevant images are appended from the layout splitter's
//! image pipeline.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;

use etf_assistant_core::models::Chunk;

use super::layout::LayoutSplitter;
use super::{sort_by_page, Splitter};
use crate::digest::bytes_digest;

#[derive(Default)]
pub struct PageSplitter {
    images: Option<LayoutSplitter>,
}

impl PageSplitter {
    pub fn new() -> Self {
        Self { images: None }
    }

    /// Page chunks plus image captions produced by `layout`.
    pub fn with_images(layout: LayoutSplitter) -> Self {
        Self {
            images: Some(layout),
        }
    }
}

/// Extract page texts from PDF bytes.
pub fn pdf_pages(bytes: &[u8]) -> Result<Vec<String>> {
    pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| anyhow::anyhow!("PDF extraction failed: {}", e))
}

#[async_trait]
impl Splitter for PageSplitter {
    async fn split(&self, path: &Path) -> Result<Vec<Chunk>> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let digest = bytes_digest(&bytes);

        let pages = tokio::task::spawn_blocking(move || pdf_pages(&bytes)).await??;

        let mut chunks: Vec<Chunk> = pages
            .into_iter()
            .enumerate()
            .map(|(i, text)| Chunk::text(&digest, i as u32 + 1, text.trim().to_string()))
            .collect();

        if let Some(layout) = &self.images {
            chunks.extend(layout.image_chunks(path).await?);
            sort_by_page(&mut chunks);
        }

        tracing::info!(chunks = chunks.len(), "generated chunks");
        Ok(chunks)
    }
}
