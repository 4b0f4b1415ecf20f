//! Error types for the command-dispatch core.
//!
//! Every dispatch operation returns [`CommandError`] via [`Result`].  Tool
//! failures are converted into non-success results at the orchestration
//! layer, so these errors never abort a conversation turn by themselves.

use thiserror::Error;

/// Alias for `Result<T, CommandError>`.
pub type Result<T> = std::result::Result<T, CommandError>;

/// Errors surfaced by the registry, executor, and router.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The named tool is not registered (or currently disabled).
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    /// A tool call argument failed validation before any side effect.
    #[error("invalid argument for `{tool}`: {reason}")]
    InvalidArgument { tool: String, reason: String },

    /// A tool with the same canonical name or alias is already registered.
    #[error("tool already registered: {name}")]
    AlreadyRegistered { name: String },

    /// Tool metadata failed validation at registration.
    #[error("invalid tool schema for `{tool}`: {reason}")]
    InvalidSchema { tool: String, reason: String },

    /// A sync-wait call received no reply within its deadline.
    #[error("command `{device}` timed out after {timeout_ms} ms")]
    Timeout { device: String, timeout_ms: u64 },

    /// Publishing to the message bus failed.
    #[error("bus publish failed: {reason}")]
    BusPublish { reason: String },

    /// The invoking context was cancelled while the call was in flight.
    #[error("command cancelled")]
    Cancelled,

    /// A tool handler failed during execution.
    #[error("tool execution failed: {reason}")]
    ToolFailed { reason: String },

    /// A reply envelope failed validation (malformed JSON, bad checksum).
    #[error("invalid reply envelope: {reason}")]
    InvalidReply { reason: String },

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
