//! Shared primitives for provider-agnostic LLM backend clients.
//!
//! The engine talks to every backend through the [`ClientWrapper`] trait and
//! the lightweight data types in this module. The trait abstracts over the
//! concrete wire formats (OpenAI-compatible, Ollama, tool-native cloud,
//! vision) while the supporting structs describe chat messages, streaming
//! events, and token accounting.
//!
//! # Basic request/response
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use agenthive::client_wrapper::{ChatMessage, ClientWrapper, Role};
//! use agenthive::clients::openai_compat::OpenAICompatClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OpenAICompatClient::new("http://127.0.0.1:8000/v1", "llamacpp:local");
//!
//!     let reply = client
//!         .chat(&[ChatMessage::user("Who are you?")], None)
//!         .await?;
//!
//!     println!("Assistant: {}", reply.content);
//!     Ok(())
//! }
//! ```

use crate::error::HiveResult;
use async_trait::async_trait;
use futures_util::stream::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A single tool call returned by a backend with a native tool protocol.
///
/// The backend assigns an opaque [`id`](NativeToolCall::id) so the tool
/// result can be correlated back in a follow-up `Role::Tool` message.
#[derive(Debug, Clone)]
pub struct NativeToolCall {
    /// Provider-assigned call id, e.g. `"toolu_01A"`.
    pub id: String,
    /// Tool name matching one of the [`ToolDefinition`]s sent in the request.
    pub name: String,
    /// Parsed JSON arguments supplied by the model for this call.
    pub arguments: serde_json::Value,
}

/// Provider-agnostic tool schema passed along with a chat request.
///
/// Derived from [`ToolMetadata`](crate::tool_protocol::ToolMetadata) via
/// [`ToolMetadata::to_tool_definition`](crate::tool_protocol::ToolMetadata::to_tool_definition).
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    /// Tool name as it appears in the request `tools` array.
    pub name: String,
    /// Description surfaced to the model to aid tool selection.
    pub description: String,
    /// JSON Schema object describing the accepted parameters.
    pub parameters_schema: serde_json::Value,
}

/// Role of a chat message.
#[derive(Debug, Clone)]
pub enum Role {
    /// A system message that primes or constrains assistant behaviour.
    System,
    /// A user-authored message.
    User,
    /// An assistant message (model output).
    Assistant,
    /// A tool-result message correlating with a prior [`NativeToolCall`].
    Tool {
        /// The id of the call this result answers.
        call_id: String,
    },
}

impl Role {
    /// Wire name for OpenAI-compatible payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool { .. } => "tool",
        }
    }
}

/// Token accounting for a single backend round-trip.
#[derive(Clone, Debug, Default)]
pub struct TokenUsage {
    /// Prompt/input tokens billed by the provider.
    pub input_tokens: usize,
    /// Generated/output tokens billed by the provider.
    pub output_tokens: usize,
    /// Convenience total equal to `input_tokens + output_tokens`.
    pub total_tokens: usize,
}

/// A generic chat message exchanged with a backend.
///
/// `tool_calls` is populated by [`ClientWrapper::chat`] when the provider
/// returns native tool-use blocks; it is empty for every other message kind.
#[derive(Clone)]
pub struct ChatMessage {
    /// The role associated with the message.
    pub role: Role,
    /// Message body. `Arc<str>` so conversation histories clone cheaply.
    pub content: Arc<str>,
    /// Native tool calls requested by the assistant, if any.
    pub tool_calls: Vec<NativeToolCall>,
}

impl ChatMessage {
    /// Build a system message.
    pub fn system(content: impl AsRef<str>) -> Self {
        Self {
            role: Role::System,
            content: Arc::from(content.as_ref()),
            tool_calls: Vec::new(),
        }
    }

    /// Build a user message.
    pub fn user(content: impl AsRef<str>) -> Self {
        Self {
            role: Role::User,
            content: Arc::from(content.as_ref()),
            tool_calls: Vec::new(),
        }
    }

    /// Build an assistant message.
    pub fn assistant(content: impl AsRef<str>) -> Self {
        Self {
            role: Role::Assistant,
            content: Arc::from(content.as_ref()),
            tool_calls: Vec::new(),
        }
    }

    /// Build a tool-result message answering `call_id`.
    pub fn tool_result(call_id: impl Into<String>, content: impl AsRef<str>) -> Self {
        Self {
            role: Role::Tool {
                call_id: call_id.into(),
            },
            content: Arc::from(content.as_ref()),
            tool_calls: Vec::new(),
        }
    }
}

/// One event on a streaming response.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// An incremental text delta.
    Chunk(String),
    /// The model requested a native tool call mid-stream.
    ToolUse(NativeToolCall),
    /// The stream completed normally.
    Done,
    /// The stream failed; carries the error description.
    Error(String),
}

/// Type alias for a stream of [`StreamEvent`]s compatible with `Send` executors.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Trait implemented by every concrete backend adapter.
///
/// Implementations translate agenthive requests into the provider-specific
/// wire format and return responses in a uniform shape. The abstraction
/// deliberately excludes conversation bookkeeping; that lives in the engine
/// and the session store. All implementations must be `Send + Sync` so they
/// can be shared between request tasks.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send a full request/response chat completion.
    ///
    /// `messages` must include any system priming the caller wants to send.
    /// When `tools` is `Some` and non-empty, backends with a native tool
    /// protocol forward the definitions and may return a message whose
    /// [`ChatMessage::tool_calls`] is non-empty; prompt-driven backends
    /// ignore the parameter.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> HiveResult<ChatMessage>;

    /// Request a streaming response.
    ///
    /// Backends without streaming support inherit the default implementation,
    /// which resolves to `Ok(None)`; the engine then falls through to
    /// [`chat`](ClientWrapper::chat) and emits the reply as one chunk.
    async fn chat_stream(
        &self,
        _messages: &[ChatMessage],
        _tools: Option<&[ToolDefinition]>,
    ) -> HiveResult<Option<EventStream>> {
        Ok(None)
    }

    /// Identifier used to select the upstream model.
    fn model_name(&self) -> &str;

    /// Usage recorded by the most recent [`chat`](ClientWrapper::chat) call.
    async fn last_usage(&self) -> Option<TokenUsage> {
        if let Some(slot) = self.usage_slot() {
            slot.lock().await.clone()
        } else {
            None
        }
    }

    /// Shared mutable slot where the implementation persists token usage.
    ///
    /// Providers that expose billing information return
    /// `Some(&Mutex<Option<TokenUsage>>)`; the default reports no usage.
    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_wire_names() {
        assert_eq!(Role::System.as_str(), "system");
        assert_eq!(
            Role::Tool {
                call_id: "c1".into()
            }
            .as_str(),
            "tool"
        );
    }

    #[test]
    fn message_constructors() {
        let msg = ChatMessage::tool_result("call_9", "42");
        match msg.role {
            Role::Tool { ref call_id } => assert_eq!(call_id, "call_9"),
            _ => panic!("expected tool role"),
        }
        assert_eq!(msg.content.as_ref(), "42");
        assert!(msg.tool_calls.is_empty());
    }
}
