//! Client for the tool-native cloud messages API (Anthropic wire format).
//!
//! Posts `{model, system, messages, tools, max_tokens}` with an `x-api-key`
//! header. The response carries content blocks; when `stop_reason` is
//! `tool_use`, the raw tool-use blocks (`{id, name, input}`) are surfaced
//! unchanged as [`NativeToolCall`]s for the engine to dispatch. Tool results
//! travel back as `tool_result` content blocks inside a user message.

use crate::client_wrapper::{
    ChatMessage, ClientWrapper, NativeToolCall, Role, TokenUsage, ToolDefinition,
};
use crate::clients::common::get_shared_http_client;
use crate::error::{HiveError, HiveResult};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: usize = 4096;

/// Client wrapper for a tool-native cloud backend.
pub struct CloudToolClient {
    /// Base URL, e.g. `https://api.anthropic.com/v1`.
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: usize,
    usage: Mutex<Option<TokenUsage>>,
}

impl CloudToolClient {
    /// Create a client against the default public endpoint.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new_with_base_url(api_key, model, "https://api.anthropic.com/v1")
    }

    /// Create a client pointing at a custom compatible base URL.
    pub fn new_with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            usage: Mutex::new(None),
        }
    }

    /// Override the completion token cap (builder pattern).
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.endpoint.trim_end_matches('/'))
    }

    /// Split messages into the API's separate system string and message list.
    ///
    /// System messages are concatenated into the top-level `system` field.
    /// `Role::Tool` messages become `tool_result` blocks in a user turn, and
    /// assistant messages that carried tool calls are re-expanded into their
    /// original `tool_use` blocks so the conversation replays faithfully.
    fn wire_payload(&self, messages: &[ChatMessage], tools: Option<&[ToolDefinition]>) -> Value {
        let mut system = String::new();
        let mut wire: Vec<Value> = Vec::new();

        for msg in messages {
            match &msg.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(msg.content.as_ref());
                }
                Role::User => wire.push(serde_json::json!({
                    "role": "user",
                    "content": msg.content.as_ref()
                })),
                Role::Assistant => {
                    if msg.tool_calls.is_empty() {
                        wire.push(serde_json::json!({
                            "role": "assistant",
                            "content": msg.content.as_ref()
                        }));
                    } else {
                        let mut blocks: Vec<Value> = Vec::new();
                        if !msg.content.is_empty() {
                            blocks.push(serde_json::json!({
                                "type": "text",
                                "text": msg.content.as_ref()
                            }));
                        }
                        for tc in &msg.tool_calls {
                            blocks.push(serde_json::json!({
                                "type": "tool_use",
                                "id": tc.id,
                                "name": tc.name,
                                "input": tc.arguments
                            }));
                        }
                        wire.push(serde_json::json!({
                            "role": "assistant",
                            "content": blocks
                        }));
                    }
                }
                Role::Tool { call_id } => wire.push(serde_json::json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": call_id,
                        "content": msg.content.as_ref()
                    }]
                })),
            }
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": wire,
        });
        if !system.is_empty() {
            body["system"] = Value::String(system);
        }
        if let Some(tools) = tools {
            if !tools.is_empty() {
                let wire_tools: Vec<Value> = tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.parameters_schema
                        })
                    })
                    .collect();
                body["tools"] = Value::Array(wire_tools);
            }
        }
        body
    }
}

/// Parse response content blocks into text + tool calls.
fn parse_content_blocks(parsed: &Value) -> (String, Vec<NativeToolCall>) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    if let Some(blocks) = parsed.get("content").and_then(|c| c.as_array()) {
        for block in blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                        text.push_str(t);
                    }
                }
                Some("tool_use") => {
                    let id = block
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let name = block
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let arguments = block.get("input").cloned().unwrap_or(Value::Null);
                    tool_calls.push(NativeToolCall {
                        id,
                        name,
                        arguments,
                    });
                }
                _ => {}
            }
        }
    }

    (text, tool_calls)
}

#[async_trait]
impl ClientWrapper for CloudToolClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> HiveResult<ChatMessage> {
        let body = self.wire_payload(messages, tools);

        let resp = get_shared_http_client()
            .post(&self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            if log::log_enabled!(log::Level::Error) {
                log::error!("CloudToolClient: HTTP {}: {}", status, text);
            }
            if status == reqwest::StatusCode::FORBIDDEN {
                return Err(HiveError::refused(text));
            }
            return Err(HiveError::transport(format!(
                "HTTP {} from cloud tool backend",
                status
            )));
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| HiveError::protocol(format!("unparseable backend response: {}", e)))?;

        if let Some(usage) = parsed.get("usage") {
            let input = usage
                .get("input_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize;
            let output = usage
                .get("output_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize;
            *self.usage.lock().await = Some(TokenUsage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: input + output,
            });
        }

        let (content, tool_calls) = parse_content_blocks(&parsed);
        let mut reply = ChatMessage::assistant(content);
        reply.tool_calls = tool_calls;
        Ok(reply)
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_splits_system_and_tools() {
        let client = CloudToolClient::new("key", "model-x");
        let tools = vec![ToolDefinition {
            name: "glob".into(),
            description: "find files".into(),
            parameters_schema: serde_json::json!({"type": "object", "properties": {}}),
        }];
        let body = client.wire_payload(
            &[
                ChatMessage::system("be terse"),
                ChatMessage::user("find rust files"),
            ],
            Some(&tools),
        );
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["tools"][0]["name"], "glob");
        assert!(body["tools"][0]["input_schema"].is_object());
    }

    #[test]
    fn tool_result_travels_as_user_block() {
        let client = CloudToolClient::new("key", "model-x");
        let body = client.wire_payload(&[ChatMessage::tool_result("toolu_1", "ok")], None);
        let msg = &body["messages"][0];
        assert_eq!(msg["role"], "user");
        assert_eq!(msg["content"][0]["type"], "tool_result");
        assert_eq!(msg["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn content_block_parsing() {
        let parsed = serde_json::json!({
            "content": [
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "toolu_2", "name": "bash", "input": {"command": "ls"}}
            ],
            "stop_reason": "tool_use"
        });
        let (text, calls) = parse_content_blocks(&parsed);
        assert_eq!(text, "Checking.");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "bash");
        assert_eq!(calls[0].arguments["command"], "ls");
    }
}
