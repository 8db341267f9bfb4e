//! Answer generation for the search chat.
//!
//! The template depends on the result-count regime (see
//! [`etf_assistant_core::results`]): zero rows, a few rows listed in
//! full, or many rows summarized by count with narrowing suggestions.

use etf_assistant_core::memory::ConversationMemory;
use etf_assistant_core::results::{select_regime, Regime, ResultSet};

use crate::chains::prompts::{render, ANSWER_FEW_RESULTS, ANSWER_MANY_RESULTS, ANSWER_NO_RESULTS};
use crate::llm::{ChatModel, LlmError};

pub struct AnswerGenerator {
    max_rows_to_pass: usize,
}

impl AnswerGenerator {
    pub fn new(max_rows_to_pass: usize) -> Self {
        Self { max_rows_to_pass }
    }

    /// Pick the template for `results` and fill it.
    pub fn prompt(
        &self,
        question: &str,
        query: &str,
        results: &ResultSet,
        suggestions: &[String],
        memory: &ConversationMemory,
    ) -> (Regime, String) {
        let history = memory.render();
        let regime = select_regime(results.len(), self.max_rows_to_pass);
        let prompt = match regime {
            Regime::NoResults => render(
                ANSWER_NO_RESULTS,
                &[
                    ("question", question),
                    ("history", history.as_str()),
                    ("query", query),
                ],
            ),
            Regime::Few => render(
                ANSWER_FEW_RESULTS,
                &[
                    ("question", question),
                    ("history", history.as_str()),
                    ("results", results.render_rows(self.max_rows_to_pass).as_str()),
                ],
            ),
            Regime::Many => render(
                ANSWER_MANY_RESULTS,
                &[
                    ("question", question),
                    ("history", history.as_str()),
                    ("n_results", results.len().to_string().as_str()),
                    ("suggestions", suggestions.join(", ").as_str()),
                ],
            ),
        };
        (regime, prompt)
    }

    pub async fn run(
        &self,
        model: &dyn ChatModel,
        question: &str,
        query: &str,
        results: &ResultSet,
        suggestions: &[String],
        memory: &ConversationMemory,
    ) -> Result<String, LlmError> {
        let (regime, prompt) = self.prompt(question, query, results, suggestions, memory);
        tracing::debug!(?regime, rows = results.len(), "generating answer");
        model.ask(&prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etf_assistant_core::results::CellValue;

    fn rows(n: usize) -> ResultSet {
        ResultSet {
            columns: vec!["isin".to_string(), "name".to_string()],
            rows: (0..n)
                .map(|i| {
                    vec![
                        CellValue::Text(format!("IE{:09}", i)),
                        CellValue::Text(format!("Fund {}", i)),
                    ]
                })
                .collect(),
        }
    }

    #[test]
    fn templates_follow_regime() {
        let gen = AnswerGenerator::new(3);
        let memory = ConversationMemory::new(5);

        let (r, p) = gen.prompt("q", "SELECT 1", &rows(0), &[], &memory);
        assert_eq!(r, Regime::NoResults);
        assert!(p.contains("found no ETFs"));

        let (r, p) = gen.prompt("q", "SELECT 1", &rows(2), &[], &memory);
        assert_eq!(r, Regime::Few);
        assert!(p.contains("isin: IE000000001, name: Fund 1"));

        let (r, p) = gen.prompt("q", "SELECT 1", &rows(7), &["currency".to_string()], &memory);
        assert_eq!(r, Regime::Many);
        assert!(p.contains("Number of ETFs found:\n7"));
        assert!(p.contains("Suggestions:\ncurrency"));
        assert!(!p.contains("IE000000000"));
    }
}
