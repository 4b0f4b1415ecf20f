//! In-memory session management.
//!
//! A session is the transient per-connection state: conversation history,
//! the per-session LLM configuration override, and an id that tools can
//! recover through the command context while they execute.  Sessions live in
//! a [`DashMap`] keyed by a 32-bit id; handing out `Arc` clones is what
//! protects an in-flight tool invocation from session teardown: `release`
//! removes the map entry, but the session itself lives until the last
//! holder drops it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use tracing::{debug, info};

use dawn_command::LOCAL_SESSION_ID;

use crate::types::{ChatMessage, LlmConfig};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Per-connection conversation state.
pub struct Session {
    /// Numeric session id; [`LOCAL_SESSION_ID`] for the local singleton.
    pub id: u32,
    /// Ordered message history.  Append-only from the perspective of an
    /// in-flight model call; `clear` is only issued from the owning
    /// connection's request path.
    history: Mutex<Vec<ChatMessage>>,
    /// LLM configuration override for this session.
    llm: RwLock<LlmConfig>,
}

impl Session {
    fn new(id: u32) -> Self {
        Self {
            id,
            history: Mutex::new(Vec::new()),
            llm: RwLock::new(LlmConfig::default()),
        }
    }

    /// Append a message to the history.
    pub fn add_message(&self, message: ChatMessage) {
        self.history.lock().expect("session lock poisoned").push(message);
    }

    /// Snapshot of the full history.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.history.lock().expect("session lock poisoned").clone()
    }

    /// Number of messages in the history.
    pub fn history_len(&self) -> usize {
        self.history.lock().expect("session lock poisoned").len()
    }

    /// Discard the history.
    pub fn clear_history(&self) {
        self.history.lock().expect("session lock poisoned").clear();
        debug!(session_id = self.id, "session history cleared");
    }

    /// Snapshot of the LLM configuration override.
    pub fn llm_config(&self) -> LlmConfig {
        self.llm.read().expect("session lock poisoned").clone()
    }

    /// Replace the LLM configuration override.
    pub fn set_llm_config(&self, config: LlmConfig) {
        *self.llm.write().expect("session lock poisoned") = config;
        debug!(session_id = self.id, "session llm config updated");
    }
}

// ---------------------------------------------------------------------------
// Session manager
// ---------------------------------------------------------------------------

/// Process-global table of live sessions.
pub struct SessionManager {
    sessions: DashMap<u32, Arc<Session>>,
    next_id: AtomicU32,
}

impl SessionManager {
    /// Create a manager with the local sentinel session pre-installed.
    pub fn new() -> Self {
        let sessions = DashMap::new();
        sessions.insert(LOCAL_SESSION_ID, Arc::new(Session::new(LOCAL_SESSION_ID)));
        Self {
            sessions,
            next_id: AtomicU32::new(LOCAL_SESSION_ID + 1),
        }
    }

    /// Create a session for a new connection.
    pub fn create(&self) -> Arc<Session> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::new(id));
        self.sessions.insert(id, Arc::clone(&session));
        info!(session_id = id, "session created");
        session
    }

    /// Look up a live session.  Returns `None` for unknown or torn-down
    /// sessions; callers fall back to [`SessionManager::local`].
    pub fn get(&self, id: u32) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// The session for `id`, or the local session when it is gone.
    pub fn get_or_local(&self, id: u32) -> Arc<Session> {
        self.get(id).unwrap_or_else(|| self.local())
    }

    /// The process-singleton local session.
    pub fn local(&self) -> Arc<Session> {
        self.get(LOCAL_SESSION_ID)
            .expect("local session is installed at startup and never released")
    }

    /// Remove a session from the table.  In-flight invocations holding an
    /// `Arc` keep the session alive until they finish.  The local session
    /// cannot be released.
    pub fn release(&self, id: u32) {
        if id == LOCAL_SESSION_ID {
            debug!("ignoring release of the local session");
            return;
        }
        if self.sessions.remove(&id).is_some() {
            info!(session_id = id, "session released");
        }
    }

    /// Number of live sessions, including the local one.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Never true: the local session is always present.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LlmKind;

    #[test]
    fn local_session_exists_and_cannot_be_released() {
        let manager = SessionManager::new();
        assert_eq!(manager.local().id, LOCAL_SESSION_ID);

        manager.release(LOCAL_SESSION_ID);
        assert_eq!(manager.local().id, LOCAL_SESSION_ID);
    }

    #[test]
    fn create_get_release() {
        let manager = SessionManager::new();
        let session = manager.create();
        assert_ne!(session.id, LOCAL_SESSION_ID);

        assert!(manager.get(session.id).is_some());
        manager.release(session.id);
        assert!(manager.get(session.id).is_none());

        // Fallback to local after teardown.
        assert_eq!(manager.get_or_local(session.id).id, LOCAL_SESSION_ID);
    }

    #[test]
    fn arc_keeps_released_session_alive() {
        let manager = SessionManager::new();
        let session = manager.create();
        session.add_message(ChatMessage::user("hello"));

        manager.release(session.id);

        // The held Arc still sees the state; a simulated in-flight tool can
        // finish against it.
        assert_eq!(session.history_len(), 1);
        session.add_message(ChatMessage::assistant("hi"));
        assert_eq!(session.history_len(), 2);
    }

    #[test]
    fn history_isolation_between_sessions() {
        let manager = SessionManager::new();
        let a = manager.create();
        let b = manager.create();

        a.add_message(ChatMessage::user("for a"));
        assert_eq!(a.history_len(), 1);
        assert_eq!(b.history_len(), 0);

        let history_b = b.history();
        assert!(history_b.is_empty());
    }

    #[test]
    fn llm_config_override_per_session() {
        let manager = SessionManager::new();
        let session = manager.create();
        assert_eq!(session.llm_config().kind, LlmKind::Local);

        session.set_llm_config(LlmConfig {
            kind: LlmKind::Cloud,
            provider: Some("claude".into()),
            model: None,
            tools_mode: "native".into(),
            thinking: false,
        });

        let config = session.llm_config();
        assert_eq!(config.kind, LlmKind::Cloud);
        assert_eq!(config.provider.as_deref(), Some("claude"));

        // Other sessions are unaffected.
        assert_eq!(manager.local().llm_config().kind, LlmKind::Local);
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_interleave_within_messages() {
        let manager = Arc::new(SessionManager::new());
        let a = manager.create();
        let b = manager.create();

        let mut handles = Vec::new();
        for (session, tag) in [(Arc::clone(&a), "a"), (Arc::clone(&b), "b")] {
            let tag = tag.to_string();
            handles.push(tokio::spawn(async move {
                for i in 0..100 {
                    session.add_message(ChatMessage::user(format!("{tag}-{i}")));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Each session sees exactly its own messages, whole and in order.
        for (session, tag) in [(a, "a"), (b, "b")] {
            let history = session.history();
            assert_eq!(history.len(), 100);
            for (i, msg) in history.iter().enumerate() {
                assert_eq!(msg.content, format!("{tag}-{i}"));
            }
        }
    }
}
