//! Message-bus wire format.
//!
//! Commands are published as UTF-8 JSON envelopes on a single topic by
//! default (tool metadata may override).  Sync-wait replies arrive on a
//! reply topic carrying the same `request_id`.  Replies may embed inline
//! binary data (base64 in `data.content`) or reference a file path in
//! `value`; either form may carry a hex SHA-256 checksum, and a present
//! checksum that fails to validate discards the whole response.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CommandError, Result};

// ---------------------------------------------------------------------------
// Command envelope
// ---------------------------------------------------------------------------

/// Outgoing command published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Canonical tool name.
    pub device: String,
    /// Action slot.
    pub action: String,
    /// Value slot; omitted when empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Correlation id, present iff the command is sync-wait.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Milliseconds since epoch.
    pub timestamp: i64,
    /// Session routing hint for external bridges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u32>,
}

impl CommandEnvelope {
    /// Build an envelope stamped with the current time.
    pub fn new(device: impl Into<String>, action: impl Into<String>, value: Option<String>) -> Self {
        Self {
            device: device.into(),
            action: action.into(),
            value,
            request_id: None,
            timestamp: Utc::now().timestamp_millis(),
            session_id: None,
        }
    }

    /// Builder: attach a correlation id for sync-wait dispatch.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Builder: attach the invoking session for per-session bridge routing.
    pub fn with_session(mut self, session_id: u32) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Serialize to the wire representation.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Reply envelope
// ---------------------------------------------------------------------------

/// Reply status discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
}

/// Error details carried by an error reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyError {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Inline binary payload of a viewing-style reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReplyData {
    /// Base64-encoded content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Content encoding hint (e.g. "base64").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    /// Hex SHA-256 digest over the decoded bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Incoming sync-wait reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    /// Correlation id matching the originating command.
    pub request_id: String,
    /// Outcome discriminator.
    #[serde(default = "default_status")]
    pub status: ReplyStatus,
    /// Error details, present iff `status == Error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
    /// Textual result, or a file path for file-reference responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Hex SHA-256 digest over the bytes of the file referenced by `value`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Inline binary payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ReplyData>,
}

fn default_status() -> ReplyStatus {
    ReplyStatus::Ok
}

impl ReplyEnvelope {
    /// Parse a reply from its wire representation.
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| CommandError::InvalidReply {
            reason: format!("malformed reply json: {e}"),
        })
    }
}

// ---------------------------------------------------------------------------
// Checksums
// ---------------------------------------------------------------------------

/// Verify a hex SHA-256 digest over `bytes`.
///
/// Comparison is case-insensitive on the hex digits.  Fail-closed callers
/// must discard the response when this returns `false`.
pub fn verify_checksum(bytes: &[u8], expected_hex: &str) -> bool {
    let digest = Sha256::digest(bytes);
    let actual = hex::encode(digest);
    actual.eq_ignore_ascii_case(expected_hex.trim())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
