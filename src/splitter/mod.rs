//! Document splitters.
//!
//! A [`Splitter`] turns a PDF into an ordered list of [`Chunk`]s, pages
//! ascending and extraction order within a page.
//!
//! | Strategy | Type | Chunks |
//! |----------|------|--------|
//! | `by-page` | [`PageSplitter`] | one text chunk per page, plus image captions when image extraction is on |
//! | `by-layout` | [`LayoutSplitter`] | merged sections, tables, optional image captions |
//!
//! Layout splitting goes through a document partitioner
//! ([`partition::Partitioner`]) and caches everything it computes under
//! `<work_dir>/splitters_cache/<digest>/`.

pub mod layout;
pub mod page;
pub mod partition;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use etf_assistant_core::models::Chunk;

use crate::config::Config;
use crate::llm::ChatModel;

pub use layout::{LayoutOptions, LayoutSplitter};
pub use page::PageSplitter;
pub use partition::Partitioner;

#[async_trait]
pub trait Splitter: Send + Sync {
    async fn split(&self, path: &Path) -> Result<Vec<Chunk>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SplitStrategy {
    ByPage,
    ByLayout,
}

impl FromStr for SplitStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "by-page" | "page" => Ok(SplitStrategy::ByPage),
            "by-layout" | "layout" => Ok(SplitStrategy::ByLayout),
            other => anyhow::bail!("Unknown split strategy: '{}'. Must be by-page or by-layout.", other),
        }
    }
}

impl fmt::Display for SplitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitStrategy::ByPage => write!(f, "by-page"),
            SplitStrategy::ByLayout => write!(f, "by-layout"),
        }
    }
}

/// Builds the splitter for an upload from its strategy and the
/// multimodal flag.
#[derive(Clone)]
pub struct SplitterFactory {
    partitioner: Arc<dyn Partitioner>,
    model: Arc<dyn ChatModel>,
    vision_model: String,
    cache_dir: PathBuf,
    max_chars: usize,
    min_chars: usize,
}

impl SplitterFactory {
    pub fn new(
        partitioner: Arc<dyn Partitioner>,
        model: Arc<dyn ChatModel>,
        vision_model: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
        max_chars: usize,
        min_chars: usize,
    ) -> Self {
        Self {
            partitioner,
            model,
            vision_model: vision_model.into(),
            cache_dir: cache_dir.into(),
            max_chars,
            min_chars,
        }
    }

    pub fn from_config(
        config: &Config,
        partitioner: Arc<dyn Partitioner>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self::new(
            partitioner,
            model,
            config.llm.vision_model.clone(),
            config.splitter_cache_dir(),
            config.docqa.layout_max_chars,
            config.docqa.layout_min_chars,
        )
    }

    fn layout(&self, multimodal: bool) -> LayoutSplitter {
        LayoutSplitter::new(
            Arc::clone(&self.partitioner),
            Arc::clone(&self.model),
            self.vision_model.clone(),
            self.cache_dir.clone(),
            LayoutOptions {
                max_chars: self.max_chars,
                min_chars: self.min_chars,
                extract_images: multimodal,
                filter_captions: multimodal,
                force_refresh: false,
            },
        )
    }

    /// Multimodal uploads extract images and keep only captions the
    /// caption filter accepts.
    pub fn build(&self, strategy: SplitStrategy, multimodal: bool) -> Box<dyn Splitter> {
        match (strategy, multimodal) {
            (SplitStrategy::ByPage, false) => Box::new(PageSplitter::new()),
            (SplitStrategy::ByPage, true) => Box::new(PageSplitter::with_images(self.layout(true))),
            (SplitStrategy::ByLayout, m) => Box::new(self.layout(m)),
        }
    }
}

/// Stable sort into page order, keeping extraction order within a page.
pub(crate) fn sort_by_page(chunks: &mut [Chunk]) {
    chunks.sort_by_key(|c| c.page);
}
