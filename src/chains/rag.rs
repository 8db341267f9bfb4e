//! Retrieval-augmented answering over one document.
//!
//! Per turn:
//! 1. Condense the question and the history into a standalone question.
//! 2. Retrieve chunks for the standalone question.
//! 3. Join chunk contents with blank lines, in retrieval order.
//! 4. Answer from the history plus that context only.
//! 5. Commit the turn to memory.
//!
//! Any failure leaves the memory untouched. The returned sources are the
//! full retrieval set; relevance filtering happens downstream.

use anyhow::Result;
use std::sync::Arc;

use etf_assistant_core::memory::ConversationMemory;
use etf_assistant_core::models::Chunk;

use crate::chains::prompts::{render, CONDENSE_QUESTION, RAG_CONTEXT};
use crate::index::Retriever;
use crate::llm::{ChatMessage, ChatModel, ChatRequest};

#[derive(Debug, Clone)]
pub struct RagOutput {
    pub answer: String,
    pub sources: Vec<Chunk>,
}

pub struct RagChain {
    retriever: Arc<dyn Retriever>,
    model: Arc<dyn ChatModel>,
    memory: ConversationMemory,
}

/// Context blob handed to the answering prompt.
pub fn combine_chunks(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

impl RagChain {
    pub fn new(retriever: Arc<dyn Retriever>, model: Arc<dyn ChatModel>, history_turns: usize) -> Self {
        Self {
            retriever,
            model,
            memory: ConversationMemory::new(history_turns),
        }
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    async fn condense(&self, question: &str) -> Result<String> {
        let history = self.memory.render();
        let prompt = render(
            CONDENSE_QUESTION,
            &[("history", history.as_str()), ("question", question)],
        );
        Ok(self.model.ask(&prompt).await?.trim().to_string())
    }

    fn answer_messages(&self, question: &str, context: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.memory.len() * 2 + 2);
        for turn in self.memory.turns() {
            messages.push(ChatMessage::user(turn.question.clone()));
            messages.push(ChatMessage::assistant(turn.answer.clone()));
        }
        messages.push(ChatMessage::user(question));
        messages.push(ChatMessage::assistant(render(
            RAG_CONTEXT,
            &[("context", context)],
        )));
        messages
    }

    pub async fn run(&mut self, question: &str) -> Result<RagOutput> {
        let standalone = self.condense(question).await?;
        tracing::debug!(standalone = %standalone, "condensed question");

        let sources = self.retriever.retrieve(&standalone).await?;
        let context = combine_chunks(&sources);

        let answer = self
            .model
            .complete(ChatRequest::new(self.answer_messages(question, &context)))
            .await?
            .into_text()?;

        self.memory.commit(question, answer.clone());
        Ok(RagOutput { answer, sources })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_joined_with_blank_lines() {
        let chunks = vec![Chunk::text("d", 1, "first"), Chunk::table("d", 2, "a | b")];
        assert_eq!(combine_chunks(&chunks), "first\n\na | b");
    }
}
