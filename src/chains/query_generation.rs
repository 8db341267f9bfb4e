//! Intent routing: SQL query or direct answer.
//!
//! The model is offered two tools and must call one of them:
//!
//! | Tool | Arguments | [`Intent`] |
//! |------|-----------|------------|
//! | `query_database` | `{"query": "..."}` | [`Intent::Sql`] |
//! | `answer_directly` | `{"answer": "..."}` | [`Intent::Direct`] |
//!
//! No tool call, an unknown tool or arguments that do not match the
//! schema all yield [`Intent::Unrecognized`]; the reason is logged.
//! Provider failures are returned as errors.

use serde::Deserialize;
use serde_json::json;

use etf_assistant_core::memory::ConversationMemory;

use crate::chains::prompts::{
    render, ANSWER_DIRECTLY_DESCRIPTION, ANSWER_DIRECTLY_TOOL, QUERY_DATABASE_DESCRIPTION,
    QUERY_DATABASE_TOOL, QUERY_GENERATION_SYSTEM,
};
use crate::llm::{ChatMessage, ChatModel, ChatRequest, LlmError, ToolSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Unexecuted SQL text.
    Sql(String),
    Direct(String),
    Unrecognized,
}

#[derive(Deserialize)]
struct QueryArgs {
    query: String,
}

#[derive(Deserialize)]
struct AnswerArgs {
    answer: String,
}

pub struct QueryGenerator {
    dialect: String,
    tables: String,
}

impl QueryGenerator {
    pub fn new(dialect: impl Into<String>, tables: impl Into<String>) -> Self {
        Self {
            dialect: dialect.into(),
            tables: tables.into(),
        }
    }

    fn tools() -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: QUERY_DATABASE_TOOL.to_string(),
                description: QUERY_DATABASE_DESCRIPTION.to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "The SQL query to execute"}
                    },
                    "required": ["query"]
                }),
            },
            ToolSpec {
                name: ANSWER_DIRECTLY_TOOL.to_string(),
                description: ANSWER_DIRECTLY_DESCRIPTION.to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "answer": {"type": "string", "description": "The answer"}
                    },
                    "required": ["answer"]
                }),
            },
        ]
    }

    /// System prompt, past turns as messages, then the new question.
    pub fn messages(&self, question: &str, memory: &ConversationMemory) -> Vec<ChatMessage> {
        let system = render(
            QUERY_GENERATION_SYSTEM,
            &[("dialect", self.dialect.as_str()), ("tables", self.tables.as_str())],
        );
        let mut messages = vec![ChatMessage::system(system)];
        for turn in memory.turns() {
            messages.push(ChatMessage::user(turn.question.clone()));
            messages.push(ChatMessage::assistant(turn.answer.clone()));
        }
        messages.push(ChatMessage::user(question));
        messages
    }

    pub async fn run(
        &self,
        model: &dyn ChatModel,
        question: &str,
        memory: &ConversationMemory,
    ) -> Result<Intent, LlmError> {
        let request = ChatRequest::new(self.messages(question, memory)).with_tools(Self::tools());
        let response = model.complete(request).await?;

        let call = match response.first_tool_call() {
            Ok(call) => call,
            Err(e) => {
                tracing::error!(error = %e, "query generation returned no tool call");
                return Ok(Intent::Unrecognized);
            }
        };

        let intent = match call.name.as_str() {
            QUERY_DATABASE_TOOL => serde_json::from_str::<QueryArgs>(&call.arguments)
                .map(|a| Intent::Sql(a.query)),
            ANSWER_DIRECTLY_TOOL => serde_json::from_str::<AnswerArgs>(&call.arguments)
                .map(|a| Intent::Direct(a.answer)),
            other => {
                tracing::error!(tool = other, "model called an unexpected tool");
                return Ok(Intent::Unrecognized);
            }
        };

        Ok(intent.unwrap_or_else(|e| {
            tracing::error!(tool = %call.name, error = %e, "tool arguments did not parse");
            Intent::Unrecognized
        }))
    }
}
