//! DAWN agent runtime.
//!
//! Everything between a parsed user turn and the user-visible response:
//!
//! - **[`session`]** -- In-memory sessions: history, per-session LLM
//!   configuration, and the local sentinel session.
//! - **[`extract`]** -- Normalizes the three tool-invocation shapes (inline
//!   tags, OpenAI `tool_calls`, Claude `tool_use`) into one canonical list.
//! - **[`orchestrator`]** -- The turn loop: model call, sequential tool
//!   execution, provider-native result feedback, optional follow-up call.
//! - **[`sse`]** -- Incremental server-sent-events parser with a bounded
//!   buffer.
//! - **[`backend`]** -- Streaming Chat Completions client for local and
//!   OpenAI-compatible endpoints.
//! - **[`schema`]** -- Provider tool-schema and prompt generation from the
//!   registry.
//! - **[`tools`]** -- The built-in tool set.

pub mod backend;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod schema;
pub mod session;
pub mod sse;
pub mod tools;
pub mod types;

// Re-export the most commonly used types at the crate root for convenience.
pub use backend::{HttpBackendConfig, OpenAiBackend};
pub use error::{AgentError, Result};
pub use extract::{Extraction, extract};
pub use orchestrator::{Orchestrator, TAG_RESULT_PREFIX, TurnState};
pub use session::{Session, SessionManager};
pub use sse::{MAX_BUFFER, SseEvent, SseParser};
pub use tools::register_builtin_tools;
pub use types::{
    BackendResponse, ChatBackend, ChatMessage, ChatRequest, LlmConfig, LlmKind, ProviderFormat,
    Role, ToolResultBlock,
};
