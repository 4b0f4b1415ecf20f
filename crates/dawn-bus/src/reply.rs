//! Reply validation.
//!
//! Every message on the reply topic is validated here before it reaches the
//! command router.  The checksum policy is fail-closed: a reply whose
//! inline `data.content` carries a checksum that does not match the decoded
//! bytes is discarded, and its waiter is woken with an empty result.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, warn};

use dawn_command::{ReplyEnvelope, verify_checksum};

/// Outcome of validating one reply payload.
#[derive(Debug, PartialEq, Eq)]
pub enum ReplyResolution {
    /// Deliver `text` to the waiter registered under `request_id`.
    Deliver { request_id: String, text: String },
    /// The payload is not a correlatable reply; drop it.
    Ignore,
}

/// Validate a raw reply payload.
///
/// Returns the payload to deliver: the raw JSON itself when valid (the
/// executor interprets it further), or an empty string when a present
/// checksum fails to validate.
pub fn resolve_reply(payload: &str) -> ReplyResolution {
    let reply = match ReplyEnvelope::parse(payload) {
        Ok(reply) => reply,
        Err(e) => {
            debug!(error = %e, "ignoring non-reply payload");
            return ReplyResolution::Ignore;
        }
    };

    if reply.request_id.is_empty() {
        debug!("ignoring reply without request id");
        return ReplyResolution::Ignore;
    }

    if let Some(data) = &reply.data {
        if let (Some(content), Some(checksum)) = (data.content.as_deref(), data.checksum.as_deref())
        {
            let valid = match BASE64.decode(content) {
                Ok(bytes) => verify_checksum(&bytes, checksum),
                Err(e) => {
                    warn!(request_id = %reply.request_id, error = %e, "reply content is not base64");
                    false
                }
            };

            if !valid {
                warn!(request_id = %reply.request_id, "reply checksum mismatch, discarding");
                return ReplyResolution::Deliver {
                    request_id: reply.request_id,
                    text: String::new(),
                };
            }
        }
    }

    ReplyResolution::Deliver {
        request_id: reply.request_id,
        text: payload.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
