//! Per-task command context and cancellation.
//!
//! The command context tells a tool which session invoked it without
//! threading a session id through every call signature.  It is a task-local
//! slot set around each tool invocation and cleared on every exit path,
//! including panics, because the scope guard drops with the future.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

/// Session id of the process-singleton local session, used for work that is
/// not attached to any user connection.
pub const LOCAL_SESSION_ID: u32 = 0;

tokio::task_local! {
    static COMMAND_SESSION: u32;
}

/// Scoped access to the invoking session id.
pub struct CommandContext;

impl CommandContext {
    /// Run `fut` with the command context set to `session_id`.
    ///
    /// The slot is restored when the future completes or is dropped, on
    /// every exit path.
    pub async fn scope<F>(session_id: u32, fut: F) -> F::Output
    where
        F: Future,
    {
        COMMAND_SESSION.scope(session_id, fut).await
    }

    /// The session that invoked the current tool, if a scope is active.
    ///
    /// Must be read on the invoking task before deferring work elsewhere.
    pub fn current() -> Option<u32> {
        COMMAND_SESSION.try_with(|id| *id).ok()
    }

    /// Like [`CommandContext::current`], falling back to the local session.
    pub fn current_or_local() -> u32 {
        Self::current().unwrap_or(LOCAL_SESSION_ID)
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cancellation signal passed through a call chain.
///
/// Cloning is cheap; all clones observe the same signal.  Cancelling unparks
/// any sync-wait command owned by the chain (the executor races the waiter
/// against [`CancelToken::cancelled`]).
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is signalled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // All senders gone without a signal; stay pending forever so
                // select! arms racing against us are unaffected.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
