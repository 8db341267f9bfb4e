//! Natural-language search over the ETF catalog.
//!
//! One turn:
//!
//! 1. Route the question to SQL or a direct answer ([`QueryGenerator`]).
//! 2. Extract the filter literals of the SQL and correct categorical
//!    values against the [`CorrectionCatalog`].
//! 3. Execute, keep `columns_to_pass` for the prompt and sample narrowing
//!    suggestions when there are too many rows.
//! 4. Generate the answer and commit the turn.
//!
//! The caller gets the answer and the full, unprojected result set.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use etf_assistant_core::memory::ConversationMemory;
use etf_assistant_core::results::{find_suggestions, select_regime, Regime, ResultSet};
use etf_assistant_core::sql_filter::substitute_literals;

use crate::catalog::CorrectionCatalog;
use crate::chains::answer_generation::AnswerGenerator;
use crate::chains::filter_extraction::FilterExtractor;
use crate::chains::query_generation::{Intent, QueryGenerator};
use crate::config::SearchConfig;
use crate::etf_db::EtfDatabase;
use crate::llm::ChatModel;

/// Answer for turns where the model neither queried nor answered.
pub const APOLOGY: &str =
    "I'm sorry, I couldn't work out how to answer that. Could you rephrase your question?";

#[derive(Debug, Clone, Serialize)]
pub struct SearchReply {
    pub answer: String,
    /// The executed query, after corrections.
    pub query: Option<String>,
    pub results: Option<ResultSet>,
}

impl SearchReply {
    fn text(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            query: None,
            results: None,
        }
    }
}

pub struct EtfSearchChat {
    model: Arc<dyn ChatModel>,
    db: Arc<EtfDatabase>,
    catalog: Option<Arc<CorrectionCatalog>>,
    extractor: Arc<dyn FilterExtractor>,
    generator: QueryGenerator,
    answers: AnswerGenerator,
    memory: ConversationMemory,
    settings: SearchConfig,
}

impl EtfSearchChat {
    /// Build a session. Reads the table schema once for the query prompt.
    pub async fn new(
        model: Arc<dyn ChatModel>,
        db: Arc<EtfDatabase>,
        catalog: Option<Arc<CorrectionCatalog>>,
        extractor: Arc<dyn FilterExtractor>,
        settings: &SearchConfig,
    ) -> Result<Self> {
        let tables = db.describe(&settings.table_description).await?;
        Ok(Self {
            model,
            db,
            catalog,
            extractor,
            generator: QueryGenerator::new(settings.dialect.clone(), tables),
            answers: AnswerGenerator::new(settings.max_rows_to_pass),
            memory: ConversationMemory::new(settings.history_turns),
            settings: settings.clone(),
        })
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub async fn chat(&mut self, question: &str) -> Result<SearchReply> {
        let query = match self
            .generator
            .run(self.model.as_ref(), question, &self.memory)
            .await?
        {
            Intent::Sql(query) => query,
            Intent::Direct(answer) => {
                self.memory.commit(question, answer.clone());
                return Ok(SearchReply::text(answer));
            }
            Intent::Unrecognized => return Ok(SearchReply::text(APOLOGY)),
        };
        tracing::info!(query = %query, "generated query");

        let query = self.correct(&query).await?;
        let results = self.db.run_query(&query).await?;
        let passed = results.project(&self.settings.columns_to_pass);

        let suggestions = match select_regime(results.len(), self.settings.max_rows_to_pass) {
            Regime::Many => {
                let mut rng = rand::thread_rng();
                find_suggestions(
                    &results,
                    &self.settings.unique_columns,
                    self.settings.n_suggestions,
                    &mut rng,
                )
            }
            Regime::NoResults | Regime::Few => Vec::new(),
        };

        let answer = self
            .answers
            .run(
                self.model.as_ref(),
                question,
                &query,
                &passed,
                &suggestions,
                &self.memory,
            )
            .await?;

        self.memory.commit(question, answer.clone());
        Ok(SearchReply {
            answer,
            query: Some(query),
            results: Some(results),
        })
    }

    /// Rewrite categorical literals to their canonical catalog values.
    async fn correct(&self, query: &str) -> Result<String> {
        let catalog = match &self.catalog {
            Some(catalog) if self.settings.apply_corrections => catalog,
            _ => return Ok(query.to_string()),
        };

        let mut replacements = Vec::new();
        for filter in self.extractor.extract(query).await? {
            if !catalog.tracks(&filter.column) {
                continue;
            }
            if let Some(canonical) = catalog.get_correction(&filter.column, &filter.value).await? {
                if canonical != filter.value {
                    tracing::info!(
                        column = %filter.column,
                        from = %filter.value,
                        to = %canonical,
                        "corrected filter value"
                    );
                    replacements.push((filter.column, filter.value, canonical));
                }
            }
        }

        if replacements.is_empty() {
            Ok(query.to_string())
        } else {
            Ok(substitute_literals(query, &replacements))
        }
    }
}
