//! Client for OpenAI-compatible chat endpoints (llama.cpp server, vLLM, and
//! friends).
//!
//! Posts `{model, messages, stream?}` to `{endpoint}/chat/completions`. The
//! non-streaming path returns the first choice's content; the streaming path
//! yields text deltas until a `finish_reason` or the `[DONE]` sentinel.
//!
//! # Example
//!
//! ```rust,no_run
//! use agenthive::client_wrapper::{ChatMessage, ClientWrapper};
//! use agenthive::clients::openai_compat::OpenAICompatClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OpenAICompatClient::new("http://127.0.0.1:8000/v1", "llamacpp:local");
//!     let reply = client.chat(&[ChatMessage::user("hi")], None).await?;
//!     println!("{}", reply.content);
//!     Ok(())
//! }
//! ```

use crate::client_wrapper::{
    ChatMessage, ClientWrapper, EventStream, TokenUsage, ToolDefinition,
};
use crate::clients::common::{
    first_choice_content, post_chat, post_chat_stream, record_openai_usage, wire_messages,
    LineEvent,
};
use crate::error::HiveResult;
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Client wrapper for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAICompatClient {
    /// Base URL, e.g. `http://127.0.0.1:8000/v1`.
    endpoint: String,
    /// Model identifier passed through in the request body.
    model: String,
    /// Optional bearer token for hosted deployments.
    api_key: Option<String>,
    usage: Mutex<Option<TokenUsage>>,
}

impl OpenAICompatClient {
    /// Create a client against a local, unauthenticated endpoint.
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: None,
            usage: Mutex::new(None),
        }
    }

    /// Create a client with a bearer token.
    pub fn new_with_api_key(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: Some(api_key.into()),
            usage: Mutex::new(None),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }
}

/// Parse one streamed SSE line from an OpenAI-compatible backend.
fn parse_stream_line(line: &str) -> LineEvent {
    if line == "[DONE]" {
        return LineEvent::Done;
    }
    let parsed: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return LineEvent::Skip, // malformed lines are skipped
    };
    let choice = match parsed.get("choices").and_then(|c| c.get(0)) {
        Some(c) => c,
        None => return LineEvent::Skip,
    };
    let content = choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("");
    if choice
        .get("finish_reason")
        .map(|f| !f.is_null())
        .unwrap_or(false)
    {
        if content.is_empty() {
            return LineEvent::Done;
        }
        // Rare: final delta carries both text and a finish reason. Surface the
        // text; the upstream close will produce the done marker.
        return LineEvent::Delta(content.to_string());
    }
    if content.is_empty() {
        LineEvent::Skip
    } else {
        LineEvent::Delta(content.to_string())
    }
}

#[async_trait]
impl ClientWrapper for OpenAICompatClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: Option<&[ToolDefinition]>,
    ) -> HiveResult<ChatMessage> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": wire_messages(messages),
        });
        let parsed = post_chat(&self.completions_url(), self.api_key.as_deref(), &body).await?;
        record_openai_usage(&parsed, &self.usage).await;
        let content = first_choice_content(&parsed)?;
        Ok(ChatMessage::assistant(content))
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        _tools: Option<&[ToolDefinition]>,
    ) -> HiveResult<Option<EventStream>> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": wire_messages(messages),
            "stream": true,
        });
        let stream = post_chat_stream(
            &self.completions_url(),
            self.api_key.as_deref(),
            &body,
            parse_stream_line,
        )
        .await?;
        Ok(Some(stream))
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_line_done_sentinel() {
        assert!(matches!(parse_stream_line("[DONE]"), LineEvent::Done));
    }

    #[test]
    fn stream_line_delta() {
        let line = r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        match parse_stream_line(line) {
            LineEvent::Delta(s) => assert_eq!(s, "Hel"),
            _ => panic!("expected delta"),
        }
    }

    #[test]
    fn stream_line_finish_reason() {
        let line = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert!(matches!(parse_stream_line(line), LineEvent::Done));
    }

    #[test]
    fn stream_line_malformed_is_skipped() {
        assert!(matches!(parse_stream_line("{nope"), LineEvent::Skip));
    }

    #[test]
    fn url_building() {
        let client = OpenAICompatClient::new("http://localhost:8000/v1/", "m");
        assert_eq!(
            client.completions_url(),
            "http://localhost:8000/v1/chat/completions"
        );
    }
}
