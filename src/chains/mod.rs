//! Prompt-driven pipeline stages.
//!
//! | Module | Stage |
//! |--------|-------|
//! | [`query_generation`] | question → SQL or direct answer |
//! | [`filter_extraction`] | SQL → WHERE literals |
//! | [`answer_generation`] | rows → natural-language answer |
//! | [`rag`] | condense, retrieve, answer over one document |
//! | [`source_filter`] | YES/NO relevance of each source |
//! | [`captions`] | image captions and caption filtering |
//! | [`summarize`] | table summaries for indexing |

pub mod answer_generation;
pub mod captions;
pub mod filter_extraction;
pub mod prompts;
pub mod query_generation;
pub mod rag;
pub mod source_filter;
pub mod summarize;
