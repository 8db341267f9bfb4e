//! Core data models shared across the assistant.
//!
//! | Type | Role |
//! |------|------|
//! | [`Chunk`] | A typed unit of extracted document content with page provenance |
//! | [`ChunkKind`] | Closed variant set: text, table, image caption |
//! | [`IndexedEntry`] | The text actually embedded in a vector collection, plus metadata |
//! | [`MetadataFilter`] | Single key/value equality used to scope store operations |
//!
//! Chunks are created once by a splitter and never mutated afterwards.
//! They are grouped by `source_id`, the content digest of the originating
//! file, which is also the only granularity at which they can be deleted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata key holding the content digest of the originating document.
pub const META_SOURCE_ID: &str = "source_id";
/// Metadata key holding the 1-indexed page number.
pub const META_PAGE: &str = "page";
/// Metadata key holding the chunk type tag (`text`, `table`, `image`).
pub const META_DOC_TYPE: &str = "doc_type";
/// Metadata key holding the path of an extracted image.
pub const META_IMAGE_FILE: &str = "image_file";
/// Metadata key linking an indexed summary to its side-store payload.
pub const META_DOC_KEY: &str = "doc_id";

/// Free-form string metadata attached to an indexed entry.
pub type Metadata = BTreeMap<String, String>;

/// The type of a [`Chunk`], carrying the per-variant payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "doc_type", rename_all = "snake_case")]
pub enum ChunkKind {
    Text,
    Table,
    #[serde(rename = "image")]
    ImageCaption {
        /// Path of the image file the caption describes.
        image_file: String,
    },
}

impl ChunkKind {
    /// The tag stored under [`META_DOC_TYPE`].
    pub fn tag(&self) -> &'static str {
        match self {
            ChunkKind::Text => "text",
            ChunkKind::Table => "table",
            ChunkKind::ImageCaption { .. } => "image",
        }
    }
}

/// A unit of extracted document content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(flatten)]
    pub kind: ChunkKind,
    /// 1-indexed page number.
    pub page: u32,
    /// Raw textual payload (page text, table text, or image caption).
    pub content: String,
    /// Content digest of the document this chunk came from.
    pub source_id: String,
}

impl Chunk {
    pub fn text(source_id: &str, page: u32, content: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::Text,
            page,
            content: content.into(),
            source_id: source_id.to_string(),
        }
    }

    pub fn table(source_id: &str, page: u32, content: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::Table,
            page,
            content: content.into(),
            source_id: source_id.to_string(),
        }
    }

    pub fn image_caption(
        source_id: &str,
        page: u32,
        caption: impl Into<String>,
        image_file: impl Into<String>,
    ) -> Self {
        Self {
            kind: ChunkKind::ImageCaption {
                image_file: image_file.into(),
            },
            page,
            content: caption.into(),
            source_id: source_id.to_string(),
        }
    }

    /// Metadata stored alongside this chunk in a vector collection.
    pub fn metadata(&self) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert(META_SOURCE_ID.to_string(), self.source_id.clone());
        meta.insert(META_PAGE.to_string(), self.page.to_string());
        meta.insert(META_DOC_TYPE.to_string(), self.kind.tag().to_string());
        if let ChunkKind::ImageCaption { image_file } = &self.kind {
            meta.insert(META_IMAGE_FILE.to_string(), image_file.clone());
        }
        meta
    }

    /// Rebuild a chunk from indexed text and its metadata.
    ///
    /// Returns `None` when the metadata lacks a source id, a numeric page
    /// or a known type tag.
    pub fn from_metadata(content: &str, meta: &Metadata) -> Option<Self> {
        let source_id = meta.get(META_SOURCE_ID)?.clone();
        let page = meta.get(META_PAGE)?.parse().ok()?;
        let kind = match meta.get(META_DOC_TYPE).map(String::as_str)? {
            "text" => ChunkKind::Text,
            "table" => ChunkKind::Table,
            "image" => ChunkKind::ImageCaption {
                image_file: meta.get(META_IMAGE_FILE).cloned().unwrap_or_default(),
            },
            _ => return None,
        };
        Some(Self {
            kind,
            page,
            content: content.to_string(),
            source_id,
        })
    }
}

/// Text stored in a vector collection together with its metadata.
///
/// For table chunks indexed in multimodal mode `text` is a generated
/// summary and the full chunk lives in the side-store under
/// `metadata[META_DOC_KEY]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedEntry {
    /// Generated identifier (UUID v4).
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

impl IndexedEntry {
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            metadata,
        }
    }
}

/// Equality filter on a single metadata key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFilter {
    pub key: String,
    pub value: String,
}

impl MetadataFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn source(source_id: &str) -> Self {
        Self::new(META_SOURCE_ID, source_id)
    }

    pub fn matches(&self, meta: &Metadata) -> bool {
        meta.get(&self.key).is_some_and(|v| v == &self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_roundtrip_keeps_image_file() {
        let chunk = Chunk::image_caption("abc", 3, "A bar plot", "/tmp/figure-3-1.jpg");
        let meta = chunk.metadata();
        assert_eq!(meta.get(META_DOC_TYPE).unwrap(), "image");
        let back = Chunk::from_metadata("A bar plot", &meta).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn from_metadata_rejects_unknown_type() {
        let mut meta = Chunk::text("abc", 1, "x").metadata();
        meta.insert(META_DOC_TYPE.to_string(), "audio".to_string());
        assert!(Chunk::from_metadata("x", &meta).is_none());
    }

    #[test]
    fn chunk_serializes_with_type_tag() {
        let json = serde_json::to_value(Chunk::table("d", 2, "a | b")).unwrap();
        assert_eq!(json["doc_type"], "table");
        assert_eq!(json["page"], 2);
    }

    #[test]
    fn filter_matches_only_exact_value() {
        let meta = Chunk::text("abc", 1, "x").metadata();
        assert!(MetadataFilter::source("abc").matches(&meta));
        assert!(!MetadataFilter::source("ab").matches(&meta));
        assert!(!MetadataFilter::new("column", "abc").matches(&meta));
    }
}
