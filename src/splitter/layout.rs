//! Layout-aware splitter with optional image captioning.
//!
//! # Cache layout
//!
//! Everything is keyed by the SHA-256 digest of the file:
//!
//! ```text
//! <cache_dir>/<digest>/
//!     elements.json            partitioner output, image payloads stripped
//!     images/figure-<page>-<n>.<ext>
//!     captions/<image stem>.txt
//!     filtered_images.json     image file names kept by the caption filter
//! ```
//!
//! Each file is reused when present. With `force_refresh` the whole
//! digest directory is moved to `<cache_dir>/backup/<digest>/<random6>`
//! before recomputing.
//!
//! Element types are parsed on every split, cached or not, so an
//! unsupported type is always an error.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use etf_assistant_core::chunk::{merge_elements, ElementKind, LayoutElement};
use etf_assistant_core::models::Chunk;

use super::partition::{Partitioner, RawElement};
use super::{sort_by_page, Splitter};
use crate::chains::captions::{caption_image, image_mime, is_relevant_caption};
use crate::digest::{file_digest, random_name};
use crate::llm::ChatModel;

const ELEMENTS_FILE: &str = "elements.json";
const FILTERED_IMAGES_FILE: &str = "filtered_images.json";
const IMAGES_DIR: &str = "images";
const CAPTIONS_DIR: &str = "captions";

#[derive(Debug, Clone)]
pub struct LayoutOptions {
    pub max_chars: usize,
    pub min_chars: usize,
    pub extract_images: bool,
    pub filter_captions: bool,
    pub force_refresh: bool,
}

pub struct LayoutSplitter {
    partitioner: Arc<dyn Partitioner>,
    model: Arc<dyn ChatModel>,
    vision_model: String,
    cache_dir: PathBuf,
    options: LayoutOptions,
}

impl LayoutSplitter {
    pub fn new(
        partitioner: Arc<dyn Partitioner>,
        model: Arc<dyn ChatModel>,
        vision_model: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
        options: LayoutOptions,
    ) -> Self {
        Self {
            partitioner,
            model,
            vision_model: vision_model.into(),
            cache_dir: cache_dir.into(),
            options,
        }
    }

    /// Image-caption chunks only, for splitters that take text from
    /// elsewhere. Returns nothing when image extraction is off.
    pub async fn image_chunks(&self, path: &Path) -> Result<Vec<Chunk>> {
        if !self.options.extract_images {
            return Ok(Vec::new());
        }
        let digest = file_digest(path)?;
        let dir = self.prepare_dir(&digest)?;
        self.load_or_partition(path, &dir).await?;
        self.caption_chunks(&digest, &dir).await
    }

    fn prepare_dir(&self, digest: &str) -> Result<PathBuf> {
        let dir = self.cache_dir.join(digest);

        if self.options.force_refresh && dir.join(ELEMENTS_FILE).exists() {
            let backup = self
                .cache_dir
                .join("backup")
                .join(digest)
                .join(random_name(6));
            if let Some(parent) = backup.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::rename(&dir, &backup).with_context(|| {
                format!("Failed to move {} to {}", dir.display(), backup.display())
            })?;
            tracing::info!(backup = %backup.display(), "moved existing splitter cache");
        }

        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        if self.options.extract_images {
            std::fs::create_dir_all(dir.join(IMAGES_DIR))?;
            std::fs::create_dir_all(dir.join(CAPTIONS_DIR))?;
        }
        Ok(dir)
    }

    async fn load_or_partition(&self, path: &Path, dir: &Path) -> Result<Vec<RawElement>> {
        let elements_file = dir.join(ELEMENTS_FILE);
        if elements_file.exists() {
            tracing::info!(file = %elements_file.display(), "found pre-computed elements");
            let bytes = std::fs::read(&elements_file)?;
            return serde_json::from_slice(&bytes)
                .with_context(|| format!("Corrupt element cache {}", elements_file.display()));
        }

        tracing::info!(file = %path.display(), "partitioning document");
        let elements = self
            .partitioner
            .partition(path, self.options.extract_images)
            .await?;

        if self.options.extract_images {
            write_images(&elements, &dir.join(IMAGES_DIR))?;
        }
        std::fs::write(&elements_file, serde_json::to_vec(&elements)?)
            .with_context(|| format!("Failed to write {}", elements_file.display()))?;
        Ok(elements)
    }

    /// Caption every extracted image (cached per image), then apply the
    /// keep-list when caption filtering is on.
    async fn caption_chunks(&self, digest: &str, dir: &Path) -> Result<Vec<Chunk>> {
        let images_dir = dir.join(IMAGES_DIR);
        let captions_dir = dir.join(CAPTIONS_DIR);

        let mut captions: BTreeMap<String, String> = BTreeMap::new();
        for image in list_images(&images_dir)? {
            let stem = file_stem(&image);
            let caption_file = captions_dir.join(format!("{}.txt", stem));
            let caption = if caption_file.exists() {
                std::fs::read_to_string(&caption_file)?
            } else {
                let name = file_name(&image);
                tracing::debug!(image = %name, "captioning image");
                let bytes = std::fs::read(&image)?;
                let caption =
                    caption_image(self.model.as_ref(), &self.vision_model, &bytes, image_mime(&name))
                        .await?;
                std::fs::write(&caption_file, &caption)?;
                caption
            };
            captions.insert(file_name(&image), caption);
        }

        if self.options.filter_captions {
            captions = self.apply_keep_list(dir, captions).await?;
        }

        captions
            .into_iter()
            .map(|(name, caption)| {
                let page = page_from_image_name(&name)?;
                let image_file = images_dir.join(&name).to_string_lossy().to_string();
                Ok(Chunk::image_caption(digest, page, caption, image_file))
            })
            .collect()
    }

    async fn apply_keep_list(
        &self,
        dir: &Path,
        captions: BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        let keep_file = dir.join(FILTERED_IMAGES_FILE);

        if keep_file.exists() {
            let keep: Vec<String> = serde_json::from_slice(&std::fs::read(&keep_file)?)
                .with_context(|| format!("Corrupt keep-list {}", keep_file.display()))?;
            let kept: BTreeMap<String, String> = captions
                .into_iter()
                .filter(|(name, _)| keep.contains(name))
                .collect();
            tracing::info!(kept = kept.len(), "loaded image keep-list");
            return Ok(kept);
        }

        let total = captions.len();
        let mut kept = BTreeMap::new();
        for (name, caption) in captions {
            if is_relevant_caption(self.model.as_ref(), &caption).await? {
                kept.insert(name, caption);
            }
        }
        tracing::info!(kept = kept.len(), total, "filtered images by caption");

        let names: Vec<&String> = kept.keys().collect();
        std::fs::write(&keep_file, serde_json::to_vec(&names)?)?;
        Ok(kept)
    }
}

#[async_trait]
impl Splitter for LayoutSplitter {
    async fn split(&self, path: &Path) -> Result<Vec<Chunk>> {
        let digest = file_digest(path)?;
        let dir = self.prepare_dir(&digest)?;
        let raw = self.load_or_partition(path, &dir).await?;

        let elements = raw
            .iter()
            .map(|r| -> Result<LayoutElement> {
                let kind: ElementKind = r.kind.parse()?;
                Ok(LayoutElement::new(kind, r.text.clone(), r.page))
            })
            .collect::<Result<Vec<_>>>()?;
        tracing::info!(elements = elements.len(), "found elements in document");

        let mut chunks = merge_elements(
            &digest,
            &elements,
            self.options.max_chars,
            self.options.min_chars,
        );
        if self.options.extract_images {
            chunks.extend(self.caption_chunks(&digest, &dir).await?);
        }
        sort_by_page(&mut chunks);

        tracing::info!(chunks = chunks.len(), "generated chunks");
        Ok(chunks)
    }
}

/// Write image payloads as `figure-<page>-<n>.<ext>`, `n` counting from 1
/// within each page.
fn write_images(elements: &[RawElement], images_dir: &Path) -> Result<()> {
    let mut per_page: HashMap<u32, usize> = HashMap::new();
    for el in elements {
        let Some(payload) = &el.image_base64 else {
            continue;
        };
        let n = per_page.entry(el.page).or_insert(0);
        *n += 1;
        let ext = match el.image_mime.as_deref() {
            Some("image/png") => "png",
            _ => "jpg",
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .context("Invalid image payload from partitioner")?;
        let path = images_dir.join(format!("figure-{}-{}.{}", el.page, n, ext));
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        })
        .collect();
    images.sort();
    Ok(images)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Page number from `figure-<page>-<n>.<ext>`.
fn page_from_image_name(name: &str) -> Result<u32> {
    let stem = name.split('.').next().unwrap_or(name);
    match stem.split('-').nth(1).and_then(|p| p.parse().ok()) {
        Some(page) => Ok(page),
        None => bail!("Cannot read page number from image name {:?}", name),
    }
}
