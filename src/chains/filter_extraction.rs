//! WHERE-clause literal extraction.
//!
//! Two interchangeable extractors:
//! - [`ParserExtractor`]: deterministic SQL scan (default).
//! - [`LlmExtractor`]: asks the model for `{"filters": [{"column", "value"}]}`
//!   in JSON mode. An answer that does not fit the schema yields an
//!   empty list.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use etf_assistant_core::sql_filter::{extract_filters, QueryFilter};

use crate::chains::prompts::{render, FILTER_EXTRACTION};
use crate::llm::{ChatModel, ChatRequest, LlmError};

#[async_trait]
pub trait FilterExtractor: Send + Sync {
    async fn extract(&self, sql: &str) -> Result<Vec<QueryFilter>, LlmError>;
}

pub struct ParserExtractor;

#[async_trait]
impl FilterExtractor for ParserExtractor {
    async fn extract(&self, sql: &str) -> Result<Vec<QueryFilter>, LlmError> {
        Ok(extract_filters(sql))
    }
}

#[derive(Deserialize)]
struct FilterList {
    filters: Vec<QueryFilter>,
}

pub struct LlmExtractor {
    model: Arc<dyn ChatModel>,
    dialect: String,
}

impl LlmExtractor {
    pub fn new(model: Arc<dyn ChatModel>, dialect: impl Into<String>) -> Self {
        Self {
            model,
            dialect: dialect.into(),
        }
    }
}

#[async_trait]
impl FilterExtractor for LlmExtractor {
    async fn extract(&self, sql: &str) -> Result<Vec<QueryFilter>, LlmError> {
        let prompt = render(
            FILTER_EXTRACTION,
            &[("dialect", self.dialect.as_str()), ("query", sql)],
        );
        let text = self
            .model
            .complete(ChatRequest::prompt(prompt).json())
            .await?
            .into_text()?;
        Ok(parse_filter_json(&text))
    }
}

fn parse_filter_json(text: &str) -> Vec<QueryFilter> {
    match serde_json::from_str::<FilterList>(text) {
        Ok(list) => list.filters,
        Err(e) => {
            tracing::warn!(error = %e, "filter extraction output did not parse");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_filters_parse() {
        let f = parse_filter_json(
            r#"{"filters": [{"column": "currency", "value": "EUR"}, {"column": "region", "value": "World"}]}"#,
        );
        assert_eq!(f.len(), 2);
        assert_eq!(f[1].value, "World");
    }

    #[test]
    fn malformed_json_is_an_empty_list() {
        assert!(parse_filter_json("currency = EUR").is_empty());
        assert!(parse_filter_json(r#"{"filters": "none"}"#).is_empty());
    }
}
