//! Agent error types.
//!
//! All agent subsystems surface errors through [`AgentError`].  Tool
//! failures are folded into non-success tool results by the orchestrator so
//! a conversation is never lost to a tool error; the variants here cover the
//! failures that do abort a turn or a stream.

use thiserror::Error;

/// Alias for `Result<T, AgentError>`.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Unified error type for the agent runtime.
#[derive(Debug, Error)]
pub enum AgentError {
    // -- Backend errors ------------------------------------------------------
    /// An HTTP request to the chat backend failed.
    #[error("backend request failed: {reason}")]
    BackendRequestFailed { reason: String },

    /// The backend response could not be parsed into the expected shape.
    #[error("backend response parse error: {reason}")]
    BackendParseFailed { reason: String },

    /// The streaming connection was interrupted or produced invalid data.
    #[error("stream error: {reason}")]
    StreamError { reason: String },

    /// The stream buffer exceeded its hard cap.  Fatal for this stream; the
    /// upstream connection must be closed.
    #[error("stream buffer overflow: {buffered} bytes exceeds cap of {cap}")]
    StreamOverflow { buffered: usize, cap: usize },

    /// The API key is missing for a backend that requires one.
    #[error("missing api key for backend: {backend}")]
    MissingApiKey { backend: String },

    // -- Turn errors ---------------------------------------------------------
    /// The turn was cancelled by its owner (disconnect or explicit abort).
    #[error("turn aborted")]
    Aborted,

    // -- Upstream crate errors -----------------------------------------------
    /// An error propagated from the command core.
    #[error("command error: {0}")]
    Command(#[from] dawn_command::CommandError),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::BackendRequestFailed {
            reason: err.to_string(),
        }
    }
}
