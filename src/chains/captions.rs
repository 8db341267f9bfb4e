//! Image captioning and caption relevance filtering.

use anyhow::Result;
use base64::Engine;

use etf_assistant_core::parse::parse_yes_no;

use crate::chains::prompts::{render, CAPTION_FILTER, IMAGE_CAPTION};
use crate::llm::{ChatMessage, ChatModel, ChatRequest, LlmError};

/// Describe an image with the vision model.
pub async fn caption_image(
    model: &dyn ChatModel,
    vision_model: &str,
    image: &[u8],
    mime: &str,
) -> Result<String, LlmError> {
    let data_url = format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(image)
    );
    let request = ChatRequest::new(vec![ChatMessage::user_with_image(IMAGE_CAPTION, data_url)])
        .with_model(vision_model);
    model.complete(request).await?.into_text()
}

/// True when the caption describes a chart, plot or scale rather than a
/// logo, title or header. Any answer other than YES/NO is an error.
pub async fn is_relevant_caption(model: &dyn ChatModel, caption: &str) -> Result<bool> {
    let answer = model
        .ask(&render(CAPTION_FILTER, &[("caption", caption)]))
        .await?;
    Ok(parse_yes_no(&answer)?)
}

/// MIME type for an extracted image, by extension.
pub fn image_mime(file_name: &str) -> &'static str {
    match file_name
        .rsplit('.')
        .next()
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}
