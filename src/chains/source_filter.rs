//! Post-hoc relevance filter over retrieved sources.

use anyhow::Result;

use etf_assistant_core::models::Chunk;
use etf_assistant_core::parse::parse_yes_no;

use crate::chains::prompts::{render, SOURCE_FILTER};
use crate::llm::ChatModel;

/// Ask whether `source` helped answer `question` with `answer`.
pub async fn is_relevant_source(
    model: &dyn ChatModel,
    question: &str,
    answer: &str,
    source: &str,
) -> Result<bool> {
    let prompt = render(
        SOURCE_FILTER,
        &[("question", question), ("answer", answer), ("source", source)],
    );
    let verdict = model.ask(&prompt).await?;
    Ok(parse_yes_no(&verdict)?)
}

/// Keep the relevant sources. When none is judged relevant the first
/// original source is kept, so a non-empty input never yields an empty
/// output.
pub async fn filter_sources(
    model: &dyn ChatModel,
    question: &str,
    answer: &str,
    sources: Vec<Chunk>,
) -> Result<Vec<Chunk>> {
    let total = sources.len();
    let mut kept = Vec::with_capacity(total);
    let mut first = None;

    for (i, source) in sources.into_iter().enumerate() {
        let relevant = is_relevant_source(model, question, answer, &source.content).await?;
        if relevant {
            kept.push(source);
        } else if i == 0 {
            first = Some(source);
        }
    }

    if kept.is_empty() {
        if let Some(first) = first {
            tracing::info!(total, "no source judged relevant, keeping the first");
            kept.push(first);
        }
    } else {
        tracing::info!(kept = kept.len(), total, "filtered sources");
    }
    Ok(kept)
}
