//! Layout-aware section builder.
//!
//! Turns the ordered element stream of a document-layout partitioner
//! into [`Chunk`]s. Text-like elements are merged into sections; tables
//! always become their own chunk.
//!
//! # Algorithm
//!
//! 1. Skip page breaks and image regions (images are captioned
//!    separately by the layout splitter).
//! 2. A table flushes the open section and is emitted alone.
//! 3. A page change flushes the open section: sections never span pages.
//! 4. A title flushes the open section once it holds at least
//!    `min_chars`; smaller sections absorb the next title instead.
//! 5. Appending an element that would push the section past `max_chars`
//!    flushes first. An element that alone exceeds `max_chars` becomes a
//!    section of its own and is not split.
//!
//! Output order follows input order, which partitioners emit page by
//! page.
//!
//! # Example
//!
//! ```rust
//! use etf_assistant_core::chunk::{merge_elements, ElementKind, LayoutElement};
//!
//! let elements = vec![
//!     LayoutElement::new(ElementKind::Title, "Fund facts", 1),
//!     LayoutElement::new(ElementKind::NarrativeText, "Tracks the MSCI World.", 1),
//! ];
//! let chunks = merge_elements("digest", &elements, 3000, 0);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].content, "Fund facts\n\nTracks the MSCI World.");
//! ```

use std::str::FromStr;

use crate::models::Chunk;
use crate::parse::ParseError;

/// Element categories emitted by the partitioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Title,
    NarrativeText,
    Text,
    UncategorizedText,
    ListItem,
    Header,
    Footer,
    Address,
    EmailAddress,
    FigureCaption,
    Formula,
    CodeSnippet,
    PageNumber,
    PageBreak,
    Table,
    Image,
    Figure,
    Picture,
}

impl ElementKind {
    /// Regions whose pixels are extracted to image files.
    pub fn is_image(&self) -> bool {
        matches!(
            self,
            ElementKind::Image | ElementKind::Figure | ElementKind::Picture
        )
    }
}

impl FromStr for ElementKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, ParseError> {
        Ok(match s {
            "Title" => ElementKind::Title,
            "NarrativeText" => ElementKind::NarrativeText,
            "Text" => ElementKind::Text,
            "UncategorizedText" => ElementKind::UncategorizedText,
            "ListItem" => ElementKind::ListItem,
            "Header" => ElementKind::Header,
            "Footer" => ElementKind::Footer,
            "Address" => ElementKind::Address,
            "EmailAddress" => ElementKind::EmailAddress,
            "FigureCaption" => ElementKind::FigureCaption,
            "Formula" => ElementKind::Formula,
            "CodeSnippet" => ElementKind::CodeSnippet,
            "PageNumber" => ElementKind::PageNumber,
            "PageBreak" => ElementKind::PageBreak,
            "Table" => ElementKind::Table,
            "Image" => ElementKind::Image,
            "Figure" => ElementKind::Figure,
            "Picture" => ElementKind::Picture,
            other => return Err(ParseError::UnknownElement(other.to_string())),
        })
    }
}

/// One partitioner element, already typed.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutElement {
    pub kind: ElementKind,
    pub text: String,
    /// 1-indexed page number.
    pub page: u32,
}

impl LayoutElement {
    pub fn new(kind: ElementKind, text: impl Into<String>, page: u32) -> Self {
        Self {
            kind,
            text: text.into(),
            page,
        }
    }
}

struct OpenSection {
    page: u32,
    text: String,
}

/// Merge elements into text and table chunks for `source_id`.
pub fn merge_elements(
    source_id: &str,
    elements: &[LayoutElement],
    max_chars: usize,
    min_chars: usize,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut open: Option<OpenSection> = None;

    let flush = |open: &mut Option<OpenSection>, chunks: &mut Vec<Chunk>| {
        if let Some(section) = open.take() {
            if !section.text.is_empty() {
                chunks.push(Chunk::text(source_id, section.page, section.text));
            }
        }
    };

    for el in elements {
        if el.kind == ElementKind::PageBreak || el.kind.is_image() {
            continue;
        }
        let text = el.text.trim();
        if text.is_empty() {
            continue;
        }

        if el.kind == ElementKind::Table {
            flush(&mut open, &mut chunks);
            chunks.push(Chunk::table(source_id, el.page, text));
            continue;
        }

        if let Some(section) = &open {
            let page_changed = section.page != el.page;
            let title_break = el.kind == ElementKind::Title && section.text.len() >= min_chars;
            let overflow = section.text.len() + 2 + text.len() > max_chars;
            if page_changed || title_break || overflow {
                flush(&mut open, &mut chunks);
            }
        }

        match &mut open {
            Some(section) => {
                section.text.push_str("\n\n");
                section.text.push_str(text);
            }
            None => {
                open = Some(OpenSection {
                    page: el.page,
                    text: text.to_string(),
                });
            }
        }
    }
    flush(&mut open, &mut chunks);

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkKind;

    fn el(kind: ElementKind, text: &str, page: u32) -> LayoutElement {
        LayoutElement::new(kind, text, page)
    }

    #[test]
    fn tables_are_never_merged() {
        let chunks = merge_elements(
            "d",
            &[
                el(ElementKind::NarrativeText, "before", 1),
                el(ElementKind::Table, "a | b", 1),
                el(ElementKind::NarrativeText, "after", 1),
            ],
            3000,
            0,
        );
        let kinds: Vec<&ChunkKind> = chunks.iter().map(|c| &c.kind).collect();
        assert_eq!(kinds, vec![&ChunkKind::Text, &ChunkKind::Table, &ChunkKind::Text]);
    }

    #[test]
    fn sections_do_not_span_pages() {
        let chunks = merge_elements(
            "d",
            &[
                el(ElementKind::NarrativeText, "p1", 1),
                el(ElementKind::NarrativeText, "p2", 2),
            ],
            3000,
            0,
        );
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].page, 2);
    }

    #[test]
    fn titles_start_sections_unless_below_floor() {
        let elements = [
            el(ElementKind::Title, "A", 1),
            el(ElementKind::NarrativeText, "short", 1),
            el(ElementKind::Title, "B", 1),
            el(ElementKind::NarrativeText, "more", 1),
        ];
        assert_eq!(merge_elements("d", &elements, 3000, 0).len(), 2);
        let merged = merge_elements("d", &elements, 3000, 100);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].content, "A\n\nshort\n\nB\n\nmore");
    }

    #[test]
    fn ceiling_flushes_but_never_splits_an_element() {
        let long = "x".repeat(50);
        let chunks = merge_elements(
            "d",
            &[
                el(ElementKind::Text, "abc", 1),
                el(ElementKind::Text, &long, 1),
                el(ElementKind::Text, "def", 1),
            ],
            20,
            0,
        );
        let lens: Vec<usize> = chunks.iter().map(|c| c.content.len()).collect();
        assert_eq!(lens, vec![3, 50, 3]);
    }

    #[test]
    fn images_and_page_breaks_are_skipped() {
        let chunks = merge_elements(
            "d",
            &[
                el(ElementKind::Image, "ocr noise", 1),
                el(ElementKind::PageBreak, "", 1),
                el(ElementKind::Text, "body", 2),
            ],
            3000,
            0,
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "body");
    }

    #[test]
    fn unknown_element_type_is_an_error() {
        assert_eq!(
            "Hologram".parse::<ElementKind>(),
            Err(ParseError::UnknownElement("Hologram".to_string()))
        );
        assert!("Figure".parse::<ElementKind>().unwrap().is_image());
    }
}
