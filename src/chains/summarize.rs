//! Table summaries for multimodal indexing.

use futures::stream::{self, StreamExt, TryStreamExt};

use crate::chains::prompts::{render, TABLE_SUMMARY};
use crate::llm::{ChatModel, LlmError};

/// Summarize each table, at most `concurrency` requests in flight.
///
/// Output order matches input order.
pub async fn summarize_tables(
    model: &dyn ChatModel,
    tables: &[String],
    concurrency: usize,
) -> Result<Vec<String>, LlmError> {
    stream::iter(tables.iter().map(|table| async move {
        model
            .ask(&render(TABLE_SUMMARY, &[("element", table.as_str())]))
            .await
    }))
    .buffered(concurrency.max(1))
    .try_collect()
    .await
}
