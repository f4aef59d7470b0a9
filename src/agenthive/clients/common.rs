//! Shared utilities used across backend client implementations.
//!
//! The helpers in this module carry the plumbing every adapter needs: a tuned
//! [`reqwest`] client with persistent connection pooling, OpenAI-style wire
//! serialization of [`ChatMessage`]s, response classification into the crate
//! error taxonomy, and a line-oriented reader that turns a streaming HTTP
//! body into an [`EventStream`] with a per-read stall cap.
//!
//! # Example: posting a chat completion
//!
//! ```rust,no_run
//! use agenthive::client_wrapper::ChatMessage;
//! use agenthive::clients::common::{post_chat, wire_messages};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let body = serde_json::json!({
//!     "model": "llamacpp:local",
//!     "messages": wire_messages(&[ChatMessage::user("hello")]),
//! });
//! let parsed = post_chat("http://127.0.0.1:8000/v1/chat/completions", None, &body).await?;
//! println!("{}", parsed["choices"][0]["message"]["content"]);
//! # Ok(())
//! # }
//! ```

use crate::client_wrapper::{ChatMessage, EventStream, Role, StreamEvent, TokenUsage};
use crate::error::{ErrorKind, HiveError, HiveResult};
use futures_util::StreamExt;
use lazy_static::lazy_static;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;

/// Per-call request deadline for non-streaming backend calls.
pub const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Maximum time a streaming read may stall between two chunks.
pub const STREAM_STALL_SECS: u64 = 120;

lazy_static! {
    /// Shared HTTP client with persistent connection pooling.
    ///
    /// A single client instance keeps TLS sessions and DNS lookups warm,
    /// which matters when many concurrent requests hit the same upstream.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build shared HTTP client")
    };
}

/// Borrow the lazily initialised shared [`reqwest::Client`].
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

/// Serialise messages to the OpenAI-compatible wire format.
///
/// | [`Role`] variant | Wire representation |
/// |---|---|
/// | `System` | `{"role":"system","content":"..."}` |
/// | `User` | `{"role":"user","content":"..."}` |
/// | `Assistant` without tool calls | `{"role":"assistant","content":"..."}` |
/// | `Assistant` with tool calls | `{"role":"assistant","content":null,"tool_calls":[...]}` |
/// | `Tool { call_id }` | `{"role":"tool","tool_call_id":"<id>","content":"..."}` |
pub fn wire_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match &msg.role {
            Role::System | Role::User => serde_json::json!({
                "role": msg.role.as_str(),
                "content": msg.content.as_ref()
            }),
            Role::Assistant => {
                if msg.tool_calls.is_empty() {
                    serde_json::json!({
                        "role": "assistant",
                        "content": msg.content.as_ref()
                    })
                } else {
                    let tool_calls: Vec<Value> = msg
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            serde_json::json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": serde_json::to_string(&tc.arguments)
                                        .unwrap_or_else(|_| "{}".to_string())
                                }
                            })
                        })
                        .collect();
                    serde_json::json!({
                        "role": "assistant",
                        "content": Value::Null,
                        "tool_calls": tool_calls
                    })
                }
            }
            Role::Tool { call_id } => serde_json::json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": msg.content.as_ref()
            }),
        })
        .collect()
}

/// Inspect a failed response body for an upstream refusal.
///
/// Providers signal policy refusals either as HTTP 403 or inside the error
/// envelope. The refusal text is preserved so the caller can surface it.
fn refusal_message(status: reqwest::StatusCode, body: &str) -> Option<String> {
    if status == reqwest::StatusCode::FORBIDDEN {
        return Some(body.to_string());
    }
    let parsed: Value = serde_json::from_str(body).ok()?;
    let err = parsed.get("error")?;
    let err_type = err.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let message = err.get("message").and_then(|v| v.as_str()).unwrap_or("");
    let lowered = format!("{} {}", err_type, message).to_lowercase();
    if lowered.contains("content_policy")
        || lowered.contains("content_filter")
        || lowered.contains("refus")
    {
        Some(message.to_string())
    } else {
        None
    }
}

/// POST a JSON body and parse the JSON response, classifying failures.
///
/// Network and socket failures map to `transport`, non-success statuses map
/// to `transport` (or `refused` when the body is a policy refusal), and an
/// unparseable success body maps to `protocol`.
pub async fn post_chat(url: &str, api_key: Option<&str>, body: &Value) -> HiveResult<Value> {
    let mut request = get_shared_http_client()
        .post(url)
        .header("Content-Type", "application/json")
        .json(body);
    if let Some(key) = api_key {
        request = request.header("Authorization", format!("Bearer {}", key));
    }

    let resp = request.send().await?;
    let status = resp.status();
    let text = resp.text().await?;

    if !status.is_success() {
        if let Some(refusal) = refusal_message(status, &text) {
            return Err(HiveError::refused(refusal));
        }
        if log::log_enabled!(log::Level::Error) {
            log::error!("post_chat: HTTP {} from {}: {}", status, url, text);
        }
        return Err(HiveError::transport(format!(
            "HTTP {} from {}",
            status, url
        )));
    }

    serde_json::from_str(&text)
        .map_err(|e| HiveError::protocol(format!("unparseable backend response: {}", e)))
}

/// Extract `choices[0].message.content` from an OpenAI-compatible response.
pub fn first_choice_content(parsed: &Value) -> HiveResult<String> {
    parsed
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HiveError::protocol("no choices in backend response"))
}

/// Persist token usage from an OpenAI-compatible `usage` object.
pub async fn record_openai_usage(parsed: &Value, usage_slot: &Mutex<Option<TokenUsage>>) {
    if let Some(usage) = parsed.get("usage") {
        let input = usage
            .get("prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        let output = usage
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        *usage_slot.lock().await = Some(TokenUsage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
        });
    }
}

/// Outcome of parsing one streamed line.
pub enum LineEvent {
    /// The line carried an incremental content delta.
    Delta(String),
    /// The line signalled end of stream.
    Done,
    /// The line carried nothing useful (keep-alive, malformed JSON, blank).
    Skip,
}

/// Start a streaming POST and adapt the line-oriented body into an
/// [`EventStream`].
///
/// `parse_line` receives each non-empty line with any `data: ` SSE prefix
/// already stripped. Reads are subject to [`STREAM_STALL_SECS`]; a stall or
/// transport failure mid-stream yields a terminal [`StreamEvent::Error`].
/// The reader stops as soon as the consumer drops the stream.
pub async fn post_chat_stream<F>(
    url: &str,
    api_key: Option<&str>,
    body: &Value,
    parse_line: F,
) -> HiveResult<EventStream>
where
    F: Fn(&str) -> LineEvent + Send + 'static,
{
    let mut request = get_shared_http_client()
        .post(url)
        .header("Content-Type", "application/json")
        // Streams have no overall deadline; the stall cap below applies per read.
        .timeout(Duration::from_secs(24 * 3600))
        .json(body);
    if let Some(key) = api_key {
        request = request.header("Authorization", format!("Bearer {}", key));
    }

    let resp = request.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        if let Some(refusal) = refusal_message(status, &text) {
            return Err(HiveError::refused(refusal));
        }
        return Err(HiveError::transport(format!(
            "HTTP {} from {}",
            status, url
        )));
    }

    let (tx, rx) = tokio::sync::mpsc::channel::<StreamEvent>(64);

    tokio::spawn(async move {
        let mut bytes = resp.bytes_stream();
        let mut buffer = String::new();
        loop {
            let next =
                tokio::time::timeout(Duration::from_secs(STREAM_STALL_SECS), bytes.next()).await;
            let chunk = match next {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => {
                    let _ = tx
                        .send(StreamEvent::Error(format!("stream read failed: {}", e)))
                        .await;
                    return;
                }
                Ok(None) => {
                    // Upstream closed without a done marker; treat as done.
                    let _ = tx.send(StreamEvent::Done).await;
                    return;
                }
                Err(_) => {
                    let _ = tx
                        .send(StreamEvent::Error(format!(
                            "{}: stream stalled for {}s",
                            ErrorKind::Timeout,
                            STREAM_STALL_SECS
                        )))
                        .await;
                    return;
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let line = line.strip_prefix("data: ").unwrap_or(line);
                match parse_line(line) {
                    LineEvent::Delta(delta) => {
                        if tx.send(StreamEvent::Chunk(delta)).await.is_err() {
                            return; // consumer went away
                        }
                    }
                    LineEvent::Done => {
                        let _ = tx.send(StreamEvent::Done).await;
                        return;
                    }
                    LineEvent::Skip => {}
                }
            }
        }
    });

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|ev| (ev, rx))
    });
    Ok(Box::pin(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_wrapper::NativeToolCall;

    #[test]
    fn wire_roles() {
        let msgs = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
            ChatMessage::tool_result("call_1", "result"),
        ];
        let wire = wire_messages(&msgs);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[1]["role"], "user");
        assert_eq!(wire[2]["content"], "hello");
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "call_1");
    }

    #[test]
    fn wire_assistant_tool_calls_null_content() {
        let mut msg = ChatMessage::assistant("");
        msg.tool_calls.push(NativeToolCall {
            id: "call_2".into(),
            name: "glob".into(),
            arguments: serde_json::json!({"pattern": "*.rs"}),
        });
        let wire = wire_messages(&[msg]);
        assert!(wire[0]["content"].is_null());
        assert_eq!(wire[0]["tool_calls"][0]["function"]["name"], "glob");
    }

    #[test]
    fn refusal_detection() {
        let body = r#"{"error":{"type":"content_policy_violation","message":"nope"}}"#;
        let found = refusal_message(reqwest::StatusCode::BAD_REQUEST, body);
        assert_eq!(found, Some("nope".to_string()));

        let plain = r#"{"error":{"type":"rate_limit","message":"slow down"}}"#;
        assert!(refusal_message(reqwest::StatusCode::BAD_REQUEST, plain).is_none());
    }

    #[test]
    fn first_choice_extraction() {
        let parsed = serde_json::json!({
            "choices": [{"message": {"content": "hi there"}}]
        });
        assert_eq!(first_choice_content(&parsed).unwrap(), "hi there");
        assert!(first_choice_content(&serde_json::json!({})).is_err());
    }
}
