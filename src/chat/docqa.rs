//! Question answering over one uploaded document.

use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use etf_assistant_core::memory::ConversationMemory;
use etf_assistant_core::models::Chunk;

use crate::chains::rag::RagChain;
use crate::chains::source_filter::filter_sources;
use crate::index::Retriever;
use crate::llm::ChatModel;

/// Source identity → pages referenced by the answer.
pub type SourcePages = BTreeMap<String, BTreeSet<u32>>;

#[derive(Debug, Clone, Serialize)]
pub struct DocQaReply {
    pub answer: String,
    pub sources: SourcePages,
}

pub struct DocumentQaChat {
    chain: RagChain,
    model: Arc<dyn ChatModel>,
    filter_sources: bool,
}

/// Collapse chunks into pages per source, dropping duplicates.
pub fn aggregate_sources(chunks: &[Chunk]) -> SourcePages {
    let mut pages = SourcePages::new();
    for chunk in chunks {
        pages
            .entry(chunk.source_id.clone())
            .or_default()
            .insert(chunk.page);
    }
    pages
}

impl DocumentQaChat {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        model: Arc<dyn ChatModel>,
        history_turns: usize,
        filter_sources: bool,
    ) -> Self {
        Self {
            chain: RagChain::new(retriever, Arc::clone(&model), history_turns),
            model,
            filter_sources,
        }
    }

    pub fn memory(&self) -> &ConversationMemory {
        self.chain.memory()
    }

    pub async fn chat(&mut self, question: &str) -> Result<DocQaReply> {
        let output = self.chain.run(question).await?;

        let sources = if self.filter_sources && !output.sources.is_empty() {
            filter_sources(self.model.as_ref(), question, &output.answer, output.sources).await?
        } else {
            output.sources
        };

        Ok(DocQaReply {
            answer: output.answer,
            sources: aggregate_sources(&sources),
        })
    }
}
