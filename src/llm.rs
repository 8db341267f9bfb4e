//! Chat-completion client.
//!
//! Every prompt in the assistant goes through the [`ChatModel`] trait, so
//! chains and chats can be driven by scripted fakes in tests. The
//! production implementation, [`OpenAiChat`], speaks the OpenAI
//! `POST /chat/completions` protocol and therefore also works against any
//! compatible server (vLLM, Ollama's `/v1`, LiteLLM, ...).
//!
//! Three request shapes are used:
//!
//! | Use | Request |
//! |-----|---------|
//! | Plain prompt | messages only |
//! | Intent routing | `tools` + `tool_choice = "required"` |
//! | Structured output | `response_format = {"type": "json_object"}` |
//!
//! Image captioning sends the picture inline as a base64 `data:` URL in a
//! user message part, with the request's model overridden by
//! `llm.vision_model`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::LlmConfig;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("chat request failed: {message}")]
    Request { message: String },

    #[error("chat provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("chat response parse error: {message}")]
    ResponseParse { message: String },

    #[error("model did not call any tool")]
    MissingToolCall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    /// `https://` or `data:image/...;base64,` URL.
    ImageUrl(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl ChatMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::Text(text.into())],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![
                ContentPart::Text(text.into()),
                ContentPart::ImageUrl(image_url.into()),
            ],
        }
    }

    /// Concatenated text parts; images are omitted.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(t) => Some(t.as_str()),
                ContentPart::ImageUrl(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn to_json(&self) -> Value {
        let content = match self.parts.as_slice() {
            [ContentPart::Text(t)] => json!(t),
            parts => Value::Array(
                parts
                    .iter()
                    .map(|p| match p {
                        ContentPart::Text(t) => json!({"type": "text", "text": t}),
                        ContentPart::ImageUrl(u) => {
                            json!({"type": "image_url", "image_url": {"url": u}})
                        }
                    })
                    .collect(),
            ),
        };
        json!({"role": self.role.as_str(), "content": content})
    }
}

/// A callable the model may choose, described by a JSON Schema.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    /// Raw JSON argument string as returned by the model.
    pub arguments: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    /// Force the model to call one of `tools`.
    pub require_tool: bool,
    pub json_mode: bool,
    /// Overrides the client's default model.
    pub model: Option<String>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn prompt(text: impl Into<String>) -> Self {
        Self::new(vec![ChatMessage::user(text)])
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self.require_tool = true;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            content: None,
            tool_calls: vec![ToolCall {
                name: name.into(),
                arguments: arguments.into(),
            }],
        }
    }

    pub fn first_tool_call(&self) -> Result<&ToolCall, LlmError> {
        self.tool_calls.first().ok_or(LlmError::MissingToolCall)
    }

    pub fn into_text(self) -> Result<String, LlmError> {
        self.content.ok_or_else(|| LlmError::ResponseParse {
            message: "response has no text content".to_string(),
        })
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;

    /// Single user prompt in, text out.
    async fn ask(&self, prompt: &str) -> Result<String, LlmError> {
        self.complete(ChatRequest::prompt(prompt)).await?.into_text()
    }
}

// ============ OpenAI-compatible client ============

/// Chat client for `POST {url}/chat/completions`.
///
/// Reads the API key from `OPENAI_API_KEY`; a missing key is allowed for
/// local servers that do not authenticate.
pub struct OpenAiChat {
    url: String,
    model: String,
    api_key: Option<String>,
    temperature: Option<f32>,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": request.messages.iter().map(ChatMessage::to_json).collect::<Vec<_>>(),
        });
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
            if request.require_tool {
                body["tool_choice"] = json!("required");
            }
        }
        if request.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = self.request_body(&request);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::warn!(attempt, "retrying chat completion");
                tokio::time::sleep(delay).await;
            }

            let mut req = self
                .client
                .post(format!("{}/chat/completions", self.url))
                .json(&body);
            if let Some(key) = &self.api_key {
                req = req.header("Authorization", format!("Bearer {}", key));
            }

            let response = match req.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_err = Some(LlmError::Request {
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let status = response.status();
            let text = response.text().await.map_err(|e| LlmError::Request {
                message: format!("failed to read response body: {}", e),
            })?;

            if status.is_success() {
                let json: Value =
                    serde_json::from_str(&text).map_err(|e| LlmError::ResponseParse {
                        message: format!("invalid JSON: {}", e),
                    })?;
                return parse_completion(&json);
            }

            let err = LlmError::Status {
                status: status.as_u16(),
                body: text,
            };
            if status.as_u16() == 429 || status.is_server_error() {
                last_err = Some(err);
                continue;
            }
            return Err(err);
        }

        Err(last_err.unwrap_or(LlmError::Request {
            message: "no attempt made".to_string(),
        }))
    }
}

/// Parse `choices[0].message` into text content and tool calls.
fn parse_completion(body: &Value) -> Result<ChatResponse, LlmError> {
    let message = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| LlmError::ResponseParse {
            message: "no choices[0].message in response".to_string(),
        })?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string());

    let tool_calls = message
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|tc| {
                    let func = tc.get("function")?;
                    Some(ToolCall {
                        name: func.get("name")?.as_str()?.to_string(),
                        arguments: func
                            .get("arguments")
                            .and_then(|a| a.as_str())
                            .unwrap_or("{}")
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        content,
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_and_tool_calls() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "query_database", "arguments": "{\"query\":\"SELECT 1\"}"}
                    }]
                }
            }]
        });
        let resp = parse_completion(&body).unwrap();
        assert_eq!(resp.content, None);
        assert_eq!(resp.first_tool_call().unwrap().name, "query_database");

        let text = parse_completion(&json!({"choices": [{"message": {"content": "hi"}}]})).unwrap();
        assert_eq!(text.into_text().unwrap(), "hi");
    }

    #[test]
    fn missing_choices_is_a_parse_error() {
        assert!(matches!(
            parse_completion(&json!({"error": "x"})),
            Err(LlmError::ResponseParse { .. })
        ));
    }

    #[test]
    fn image_messages_use_content_parts() {
        let msg = ChatMessage::user_with_image("describe", "data:image/jpeg;base64,AAAA");
        let v = msg.to_json();
        assert_eq!(v["content"][0]["type"], "text");
        assert_eq!(v["content"][1]["image_url"]["url"], "data:image/jpeg;base64,AAAA");
        assert_eq!(ChatMessage::user("plain").to_json()["content"], "plain");
    }

    #[test]
    fn tools_force_a_choice() {
        let chat = OpenAiChat::new(&LlmConfig::default()).unwrap();
        let req = ChatRequest::prompt("q").with_tools(vec![ToolSpec {
            name: "answer_directly".to_string(),
            description: "d".to_string(),
            parameters: json!({"type": "object"}),
        }]);
        let body = chat.request_body(&req);
        assert_eq!(body["tool_choice"], "required");
        assert_eq!(body["tools"][0]["function"]["name"], "answer_directly");
        assert!(body.get("response_format").is_none());
    }
}
