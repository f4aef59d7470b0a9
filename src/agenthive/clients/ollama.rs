//! Client for a local Ollama daemon.
//!
//! Posts `{model, messages, stream}` to `{endpoint}/api/chat`. The
//! non-streaming path returns `message.content`; the streaming path yields
//! incremental `message.content` deltas until `done: true`. Models routed
//! here carry an `ollama:` prefix on their identifier, which is stripped
//! before transmission.

use crate::client_wrapper::{
    ChatMessage, ClientWrapper, EventStream, TokenUsage, ToolDefinition,
};
use crate::clients::common::{post_chat, post_chat_stream, wire_messages, LineEvent};
use crate::error::{HiveError, HiveResult};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Client wrapper for Ollama's `/api/chat` endpoint.
pub struct OllamaClient {
    /// Base URL, e.g. `http://127.0.0.1:11434`.
    endpoint: String,
    /// Model name as sent to the daemon (any `ollama:` prefix stripped).
    model: String,
    usage: Mutex<Option<TokenUsage>>,
}

impl OllamaClient {
    /// Create a client for a local daemon.
    pub fn new(endpoint: impl Into<String>, model: impl AsRef<str>) -> Self {
        let model = model.as_ref();
        let model = model.strip_prefix("ollama:").unwrap_or(model);
        Self {
            endpoint: endpoint.into(),
            model: model.to_string(),
            usage: Mutex::new(None),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.endpoint.trim_end_matches('/'))
    }
}

/// Parse one streamed JSON line from the Ollama daemon.
fn parse_stream_line(line: &str) -> LineEvent {
    let parsed: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return LineEvent::Skip,
    };
    let content = parsed
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("");
    let done = parsed.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
    if done {
        return LineEvent::Done;
    }
    if content.is_empty() {
        LineEvent::Skip
    } else {
        LineEvent::Delta(content.to_string())
    }
}

#[async_trait]
impl ClientWrapper for OllamaClient {
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
            "stream": false,
        });
        let parsed = post_chat(&self.chat_url(), None, &body).await?;

        // Ollama reports token counts outside an OpenAI-style usage object.
        let input = parsed
            .get("prompt_eval_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        let output = parsed.get("eval_count").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        if input + output > 0 {
            *self.usage.lock().await = Some(TokenUsage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: input + output,
            });
        }

        let content = parsed
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| HiveError::protocol("no message.content in ollama response"))?;
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
        let stream = post_chat_stream(&self.chat_url(), None, &body, parse_stream_line).await?;
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
    fn model_prefix_is_stripped() {
        let client = OllamaClient::new("http://127.0.0.1:11434", "ollama:qwen2.5");
        assert_eq!(client.model_name(), "qwen2.5");
    }

    #[test]
    fn stream_line_delta_and_done() {
        let delta = r#"{"message":{"content":"Hi"},"done":false}"#;
        match parse_stream_line(delta) {
            LineEvent::Delta(s) => assert_eq!(s, "Hi"),
            _ => panic!("expected delta"),
        }
        let done = r#"{"message":{"content":""},"done":true}"#;
        assert!(matches!(parse_stream_line(done), LineEvent::Done));
    }
}
