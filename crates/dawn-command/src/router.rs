//! Request/response correlation for sync-wait commands.
//!
//! A sync-wait command publishes a bus message carrying a fresh request id,
//! then parks on the router until the matching reply arrives, the caller's
//! deadline passes, or the call is cancelled.  The table holds one oneshot
//! sender per outstanding request; delivery removes the entry and sends in a
//! single step, so every waiter resolves exactly once and a late delivery
//! for an already-resolved id is ignored.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, trace};
use uuid::Uuid;

/// A parked sync-wait caller, created by [`CommandRouter::register`].
///
/// Consumed by [`CommandRouter::wait`]; the id alone is enough to deliver or
/// cancel from other tasks.
pub struct Waiter {
    /// Fresh opaque correlation id carried on the bus.
    pub request_id: String,
    rx: oneshot::Receiver<String>,
}

/// Correlation table mapping request ids to parked callers.
#[derive(Default)]
pub struct CommandRouter {
    // Held only for table mutation, never across an await.
    waiters: Mutex<HashMap<String, oneshot::Sender<String>>>,
}

impl CommandRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new waiter and return it together with its fresh request id.
    pub fn register(&self) -> Waiter {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        self.waiters
            .lock()
            .expect("router lock poisoned")
            .insert(request_id.clone(), tx);

        trace!(request_id = %request_id, "waiter registered");
        Waiter { request_id, rx }
    }

    /// Park until delivery, cancellation, or timeout.
    ///
    /// Returns the delivered string on success; an empty string is a
    /// legitimate "executed, no data" reply.  Timeout and cancellation both
    /// return `None`.  The waiter is consumed either way.
    pub async fn wait(&self, waiter: Waiter, timeout: Duration) -> Option<String> {
        let Waiter { request_id, rx } = waiter;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(text)) => Some(text),
            // Sender dropped: the waiter was cancelled.
            Ok(Err(_)) => {
                debug!(request_id = %request_id, "waiter cancelled");
                None
            }
            Err(_) => {
                // Deadline passed; remove our entry so a late delivery finds
                // nothing to wake.
                self.waiters
                    .lock()
                    .expect("router lock poisoned")
                    .remove(&request_id);
                debug!(request_id = %request_id, timeout_ms = timeout.as_millis() as u64, "waiter timed out");
                None
            }
        }
    }

    /// Deliver a reply to the waiter registered under `request_id`.
    ///
    /// Returns `true` if a waiter was woken.  An unknown id (already timed
    /// out, cancelled, or never registered) is silently ignored.
    pub fn deliver(&self, request_id: &str, text: impl Into<String>) -> bool {
        let sender = self
            .waiters
            .lock()
            .expect("router lock poisoned")
            .remove(request_id);

        match sender {
            Some(tx) => {
                // A send failure means the waiter gave up between our removal
                // and now; the reply is dropped, which is the same outcome as
                // an unknown id.
                let woken = tx.send(text.into()).is_ok();
                trace!(request_id = %request_id, woken, "reply delivered");
                woken
            }
            None => {
                debug!(request_id = %request_id, "reply for unknown request id ignored");
                false
            }
        }
    }

    /// Cancel the waiter registered under `request_id`, waking it empty.
    pub fn cancel(&self, request_id: &str) {
        let removed = self
            .waiters
            .lock()
            .expect("router lock poisoned")
            .remove(request_id)
            .is_some();
        if removed {
            debug!(request_id = %request_id, "waiter cancelled by owner");
        }
        // Dropping the sender wakes the receiver with an error, which
        // `wait` maps to `None`.
    }

    /// Number of currently outstanding waiters.
    pub fn outstanding(&self) -> usize {
        self.waiters.lock().expect("router lock poisoned").len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
