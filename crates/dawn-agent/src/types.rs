//! Core types for conversation turns.
//!
//! These types model the data flowing between sessions, the turn
//! orchestrator, and chat backends.  They are provider-agnostic at this
//! layer; the [`crate::backend`] module translates them into wire formats,
//! and [`crate::extract`] normalizes provider responses back into them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use dawn_command::tool::{ToolCall, VisionPayload};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions that shape model behavior.
    System,
    /// Input from the human user.
    User,
    /// Output from the LLM.
    Assistant,
    /// Result of a tool invocation, fed back to the model.
    Tool,
}

impl Role {
    /// Stable string form used in the conversation store.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool-result content block carried inside a user message
/// (Claude-shape result feedback).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    /// Id of the tool call this block answers.
    pub tool_use_id: String,
    /// Textual result content.
    pub content: String,
}

/// A single message in a conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who produced this message.
    pub role: Role,

    /// The textual content of the message.  May be empty for assistant
    /// messages that carry only tool calls.
    #[serde(default)]
    pub content: String,

    /// Tool calls requested by the assistant (assistant role only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Tool-result blocks (user role, Claude shape only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultBlock>,

    /// Which tool call this message answers (tool role, OpenAI shape only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create an assistant text message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create an assistant message that carries tool calls alongside any
    /// leading text.
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_results: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create an OpenAI-shape tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Create a Claude-shape user message carrying tool-result blocks.
    pub fn user_tool_results(blocks: Vec<ToolResultBlock>) -> Self {
        Self {
            role: Role::User,
            content: String::new(),
            tool_calls: Vec::new(),
            tool_results: blocks,
            tool_call_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Provider format
// ---------------------------------------------------------------------------

/// Which tool-invocation protocol a backend speaks.
///
/// Controls both how tool calls are extracted from responses and how tool
/// results are appended back into the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFormat {
    /// Structured `tool_calls` array (OpenAI-compatible endpoints).
    OpenAi,
    /// Content blocks with `tool_use` / `tool_result` (Claude-compatible).
    Claude,
    /// Inline `<command>…</command>` tags in free text (local models
    /// without native function calling).
    Tag,
}

// ---------------------------------------------------------------------------
// Per-session LLM configuration
// ---------------------------------------------------------------------------

/// Where inference happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmKind {
    /// Self-hosted inference endpoint.
    Local,
    /// Cloud provider.
    Cloud,
}

/// Per-session LLM configuration override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Local or cloud inference.
    pub kind: LlmKind,
    /// Cloud provider tag ("openai", "claude", "gemini").
    pub provider: Option<String>,
    /// Explicit model identifier; `None` uses the backend default.
    pub model: Option<String>,
    /// Tool mode ("auto", "native", "inline", "off").
    pub tools_mode: String,
    /// Extended-thinking mode.
    pub thinking: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            kind: LlmKind::Local,
            provider: None,
            model: None,
            tools_mode: "auto".into(),
            thinking: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Backend contract
// ---------------------------------------------------------------------------

/// A full request to a chat backend.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier; empty uses the backend default.
    pub model: String,
    /// The conversation history.
    pub messages: Vec<ChatMessage>,
    /// Provider tool schemas the model may invoke; empty disables tools.
    pub tools: Vec<Value>,
    /// Image attached to this call (follow-up after a vision tool).
    pub image: Option<VisionPayload>,
    /// Maximum tokens the model may generate in this turn.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
}

impl ChatRequest {
    /// A plain request over `messages` with no tools.
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            model: String::new(),
            messages,
            tools: Vec::new(),
            image: None,
            max_tokens: None,
            temperature: None,
        }
    }

    /// Builder: expose tool schemas.
    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }

    /// Builder: attach a vision payload.
    pub fn with_image(mut self, image: VisionPayload) -> Self {
        self.image = Some(image);
        self
    }
}

/// The assistant output of one backend call.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    /// Accumulated assistant text (tool-call-only responses yield an empty
    /// string here).
    pub text: String,
    /// The provider response in its canonical non-streaming JSON shape,
    /// when the protocol has one.  [`crate::extract`] normalizes this.
    pub raw: Option<Value>,
}

impl BackendResponse {
    /// A plain-text response with no structured body.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            raw: None,
        }
    }
}

/// Streaming chat contract every model backend implements.
///
/// Implementations stream tokens, invoking `on_text` per text delta, and
/// return the aggregated response when the stream completes.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Which tool-invocation protocol this backend speaks.
    fn format(&self) -> ProviderFormat;

    /// Send a chat request, streaming text deltas through `on_text`.
    async fn stream_chat(
        &self,
        request: &ChatRequest,
        on_text: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> crate::error::Result<BackendResponse>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        for role in [Role::System, Role::User, Role::Assistant, Role::Tool] {
            let json = serde_json::to_string(&role).unwrap();
            let back: Role = serde_json::from_str(&json).unwrap();
            assert_eq!(role, back);
        }
        assert_eq!(Role::Tool.as_str(), "tool");
    }

    #[test]
    fn message_constructors() {
        let msg = ChatMessage::tool_result("call_1", "42");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));

        let msg = ChatMessage::user_tool_results(vec![ToolResultBlock {
            tool_use_id: "toolu_1".into(),
            content: "ok".into(),
        }]);
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.tool_results.len(), 1);
    }

    #[test]
    fn llm_config_default_is_local() {
        let config = LlmConfig::default();
        assert_eq!(config.kind, LlmKind::Local);
        assert!(config.provider.is_none());
        assert_eq!(config.tools_mode, "auto");
    }
}
