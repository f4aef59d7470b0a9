//! Client for a cloud vision chat endpoint.
//!
//! Like [`OpenAICompatClient`](crate::clients::openai_compat::OpenAICompatClient)
//! but accepts messages whose content is a heterogeneous sequence of text
//! parts and image-URL parts, as hosted vision models expect. Returns text.

use crate::client_wrapper::{ChatMessage, ClientWrapper, TokenUsage, ToolDefinition};
use crate::clients::common::{first_choice_content, post_chat, record_openai_usage};
use crate::error::HiveResult;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

/// One part of a vision message's content.
#[derive(Debug, Clone)]
pub enum VisionPart {
    /// A plain text segment.
    Text(String),
    /// An image reference (https URL or data URI).
    ImageUrl(String),
}

impl VisionPart {
    fn to_wire(&self) -> Value {
        match self {
            VisionPart::Text(text) => serde_json::json!({
                "type": "text",
                "text": text
            }),
            VisionPart::ImageUrl(url) => serde_json::json!({
                "type": "image_url",
                "image_url": {"url": url}
            }),
        }
    }
}

/// Client wrapper for an OpenAI-compatible vision endpoint.
pub struct CloudVisionClient {
    endpoint: String,
    model: String,
    api_key: String,
    usage: Mutex<Option<TokenUsage>>,
}

impl CloudVisionClient {
    /// Create a vision client.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            usage: Mutex::new(None),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    /// Analyze a mixed text/image request and return the model's text answer.
    ///
    /// `system` primes the model; `parts` is the user turn's content.
    pub async fn analyze(&self, system: &str, parts: &[VisionPart]) -> HiveResult<String> {
        let content: Vec<Value> = parts.iter().map(|p| p.to_wire()).collect();
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": content},
            ],
        });
        let parsed = post_chat(&self.completions_url(), Some(&self.api_key), &body).await?;
        record_openai_usage(&parsed, &self.usage).await;
        first_choice_content(&parsed)
    }
}

#[async_trait]
impl ClientWrapper for CloudVisionClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    /// Plain-text path: the engine uses this when a vision request carries no
    /// image, or when another component treats the vision backend as a
    /// text-only responder.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: Option<&[ToolDefinition]>,
    ) -> HiveResult<ChatMessage> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": crate::clients::common::wire_messages(messages),
        });
        let parsed = post_chat(&self.completions_url(), Some(&self.api_key), &body).await?;
        record_openai_usage(&parsed, &self.usage).await;
        let content = first_choice_content(&parsed)?;
        Ok(ChatMessage::assistant(content))
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_wire_shapes() {
        let text = VisionPart::Text("what is this".into()).to_wire();
        assert_eq!(text["type"], "text");

        let img = VisionPart::ImageUrl("https://example.com/a.png".into()).to_wire();
        assert_eq!(img["type"], "image_url");
        assert_eq!(img["image_url"]["url"], "https://example.com/a.png");
    }
}
