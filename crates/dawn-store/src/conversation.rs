//! Durable per-user conversations and messages.
//!
//! Serves both the live chat path and management UI operations.  Every
//! operation takes the acting user id and enforces ownership: a conversation
//! that exists but belongs to someone else is `Forbidden`, a missing one is
//! `NotFound`.  Mutations are durable before returning and multi-step
//! operations run inside a transaction on the store's single write
//! connection.

use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// Model settings sealed into a conversation by its first message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSettings {
    /// "local" or "cloud".
    pub llm_type: String,
    /// Cloud provider tag.
    pub provider: Option<String>,
    /// Explicit model string.
    pub model: String,
    /// Tool mode the conversation was started with.
    pub tools_mode: String,
    /// Thinking-mode setting ("auto", "on", "off").
    pub thinking_mode: String,
}

/// A conversation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Row id.
    pub id: i64,
    /// Owning user.
    pub user_id: i64,
    /// Display title.
    pub title: String,
    /// Where the conversation started ("webui", "voice").
    pub origin: String,
    /// Archived conversations are hidden from the default listing.
    pub archived: bool,
    /// Private conversations are excluded from memory extraction.
    pub private: bool,
    /// Predecessor conversation, when this one continues a summarized chat.
    pub continued_from: Option<i64>,
    /// Summary of the predecessor, stored on the continuation.
    pub summary: Option<String>,
    /// Locked model settings; `None` until the first message seals them.
    pub llm_settings: Option<LlmSettings>,
    /// Context-window usage gauge.
    pub context_tokens_used: i64,
    /// Context-window size gauge.
    pub context_tokens_max: i64,
    /// Number of messages; matches the `messages` table.
    pub message_count: i64,
    /// Milliseconds since epoch.
    pub created_at: i64,
    /// Milliseconds since epoch.
    pub updated_at: i64,
}

/// A single message within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Row id; strictly increasing within a conversation.
    pub id: i64,
    /// Parent conversation.
    pub conversation_id: i64,
    /// "system", "user", "assistant", or "tool".
    pub role: String,
    /// Message body.
    pub content: String,
    /// Milliseconds since epoch.
    pub created_at: i64,
}

/// Column list matching [`row_to_record`].
const CONVERSATION_COLUMNS: &str = "id, user_id, title, origin, archived, private, \
     continued_from, summary, llm_locked, llm_type, llm_provider, llm_model, \
     llm_tools_mode, llm_thinking_mode, context_tokens_used, context_tokens_max, \
     message_count, created_at, updated_at";

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRecord> {
    let locked: bool = row.get(8)?;
    let llm_settings = if locked {
        Some(LlmSettings {
            llm_type: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
            provider: row.get(10)?,
            model: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
            tools_mode: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
            thinking_mode: row.get::<_, Option<String>>(13)?.unwrap_or_default(),
        })
    } else {
        None
    };

    Ok(ConversationRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        origin: row.get(3)?,
        archived: row.get(4)?,
        private: row.get(5)?,
        continued_from: row.get(6)?,
        summary: row.get(7)?,
        llm_settings,
        context_tokens_used: row.get(14)?,
        context_tokens_max: row.get(15)?,
        message_count: row.get(16)?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}

// ═══════════════════════════════════════════════════════════════════════
//  ConversationStore
// ═══════════════════════════════════════════════════════════════════════

/// CRUD operations on conversations and their messages.
#[derive(Clone)]
pub struct ConversationStore {
    db: Database,
    max_per_user: u32,
}

impl ConversationStore {
    /// Create a store backed by `db` with the given per-user quota.
    pub fn new(db: Database, max_per_user: u32) -> Self {
        Self { db, max_per_user }
    }

    // ── creation and lookup ──────────────────────────────────────────

    /// Create a conversation for `user_id`.
    ///
    /// Enforces the per-user conversation quota.
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        user_id: i64,
        title: Option<&str>,
        origin: &str,
    ) -> StoreResult<ConversationRecord> {
        let title = title.unwrap_or("New conversation").to_string();
        let origin = origin.to_string();
        let now = Utc::now().timestamp_millis();
        let max = self.max_per_user;

        let id = self
            .db
            .execute(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM conversations WHERE user_id = ?1",
                    rusqlite::params![user_id],
                    |row| row.get(0),
                )?;
                if count >= max as i64 {
                    return Err(StoreError::LimitExceeded {
                        entity: "conversations",
                        limit: max,
                    });
                }

                conn.execute(
                    "INSERT INTO conversations (user_id, title, origin, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    rusqlite::params![user_id, title, origin, now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        debug!(conversation_id = id, user_id, "conversation created");
        self.get(user_id, id).await
    }

    /// Fetch a conversation, enforcing ownership.
    #[instrument(skip(self))]
    pub async fn get(&self, user_id: i64, id: i64) -> StoreResult<ConversationRecord> {
        self.db
            .execute(move |conn| {
                let record = fetch_record(conn, id)?;
                authorize(user_id, &record)?;
                Ok(record)
            })
            .await
    }

    /// List the user's conversations, most recently updated first.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        user_id: i64,
        include_archived: bool,
        limit: u32,
        offset: u32,
    ) -> StoreResult<Vec<ConversationRecord>> {
        self.db
            .execute(move |conn| {
                let sql = format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                     WHERE user_id = ?1 AND (?2 OR archived = 0) \
                     ORDER BY updated_at DESC, id DESC LIMIT ?3 OFFSET ?4"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(
                        rusqlite::params![user_id, include_archived, limit, offset],
                        row_to_record,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Number of conversations the user owns (archived included).
    #[instrument(skip(self))]
    pub async fn count(&self, user_id: i64) -> StoreResult<i64> {
        self.db
            .execute(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM conversations WHERE user_id = ?1",
                    rusqlite::params![user_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
    }

    // ── messages ─────────────────────────────────────────────────────

    /// Append a message, bumping the parent's `message_count` and
    /// `updated_at` in the same transaction.  Returns the message id.
    #[instrument(skip(self, content))]
    pub async fn add_message(
        &self,
        user_id: i64,
        id: i64,
        role: &str,
        content: &str,
    ) -> StoreResult<i64> {
        let role = role.to_string();
        let content = content.to_string();
        let now = Utc::now().timestamp_millis();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let record = fetch_record(&tx, id)?;
                authorize(user_id, &record)?;

                tx.execute(
                    "INSERT INTO messages (conversation_id, role, content, created_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![id, role, content, now],
                )?;
                let message_id = tx.last_insert_rowid();

                tx.execute(
                    "UPDATE conversations SET message_count = message_count + 1, \
                     updated_at = MAX(?2, updated_at + 1) WHERE id = ?1",
                    rusqlite::params![id, now],
                )?;

                tx.commit()?;
                Ok(message_id)
            })
            .await
    }

    /// All messages in ascending id order.
    #[instrument(skip(self))]
    pub async fn get_messages(&self, user_id: i64, id: i64) -> StoreResult<Vec<MessageRecord>> {
        self.db
            .execute(move |conn| {
                let record = fetch_record(conn, id)?;
                authorize(user_id, &record)?;

                let mut stmt = conn.prepare(
                    "SELECT id, conversation_id, role, content, created_at \
                     FROM messages WHERE conversation_id = ?1 ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![id], row_to_message)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// At most `limit` messages with ids strictly below `before_id` (or from
    /// the newest when `before_id` is 0), in **descending** id order.
    ///
    /// Returns the page plus the conversation's total message count; the
    /// caller reverses client-side for display.
    #[instrument(skip(self))]
    pub async fn get_messages_paginated(
        &self,
        user_id: i64,
        id: i64,
        limit: u32,
        before_id: i64,
    ) -> StoreResult<(Vec<MessageRecord>, i64)> {
        self.db
            .execute(move |conn| {
                let record = fetch_record(conn, id)?;
                authorize(user_id, &record)?;

                let total: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                    rusqlite::params![id],
                    |row| row.get(0),
                )?;

                let mut stmt = conn.prepare(
                    "SELECT id, conversation_id, role, content, created_at \
                     FROM messages WHERE conversation_id = ?1 AND (?2 = 0 OR id < ?2) \
                     ORDER BY id DESC LIMIT ?3",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![id, before_id, limit], row_to_message)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((rows, total))
            })
            .await
    }

    // ── settings and flags ───────────────────────────────────────────

    /// Seal the conversation's model settings.
    ///
    /// Succeeds exactly once, while `message_count == 0`.  Returns `true`
    /// when this call sealed the settings, `false` when they were already
    /// locked (a no-op; stored settings are left unchanged).
    #[instrument(skip(self, settings))]
    pub async fn lock_llm_settings(
        &self,
        user_id: i64,
        id: i64,
        settings: LlmSettings,
    ) -> StoreResult<bool> {
        self.db
            .execute(move |conn| {
                let record = fetch_record(conn, id)?;
                authorize(user_id, &record)?;

                let changed = conn.execute(
                    "UPDATE conversations SET llm_locked = 1, llm_type = ?2, llm_provider = ?3, \
                     llm_model = ?4, llm_tools_mode = ?5, llm_thinking_mode = ?6 \
                     WHERE id = ?1 AND llm_locked = 0 AND message_count = 0",
                    rusqlite::params![
                        id,
                        settings.llm_type,
                        settings.provider,
                        settings.model,
                        settings.tools_mode,
                        settings.thinking_mode
                    ],
                )?;

                if changed == 0 {
                    debug!(conversation_id = id, "llm settings already locked");
                }
                Ok(changed > 0)
            })
            .await
    }

    /// Update the context-token usage gauges.
    #[instrument(skip(self))]
    pub async fn update_context(
        &self,
        user_id: i64,
        id: i64,
        tokens_used: i64,
        tokens_max: i64,
    ) -> StoreResult<()> {
        self.db
            .execute(move |conn| {
                let record = fetch_record(conn, id)?;
                authorize(user_id, &record)?;
                conn.execute(
                    "UPDATE conversations SET context_tokens_used = ?2, context_tokens_max = ?3 \
                     WHERE id = ?1",
                    rusqlite::params![id, tokens_used, tokens_max],
                )?;
                Ok(())
            })
            .await
    }

    /// Set or clear the privacy flag.
    #[instrument(skip(self))]
    pub async fn set_private(&self, user_id: i64, id: i64, private: bool) -> StoreResult<()> {
        self.db
            .execute(move |conn| {
                let record = fetch_record(conn, id)?;
                authorize(user_id, &record)?;
                conn.execute(
                    "UPDATE conversations SET private = ?2 WHERE id = ?1",
                    rusqlite::params![id, private],
                )?;
                Ok(())
            })
            .await
    }

    /// Rename the conversation.
    #[instrument(skip(self))]
    pub async fn rename(&self, user_id: i64, id: i64, title: &str) -> StoreResult<()> {
        let title = title.to_string();
        self.db
            .execute(move |conn| {
                let record = fetch_record(conn, id)?;
                authorize(user_id, &record)?;
                conn.execute(
                    "UPDATE conversations SET title = ?2 WHERE id = ?1",
                    rusqlite::params![id, title],
                )?;
                Ok(())
            })
            .await
    }

    // ── deletion ─────────────────────────────────────────────────────

    /// Delete the conversation; messages cascade.
    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: i64, id: i64) -> StoreResult<()> {
        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let record = fetch_record(&tx, id)?;
                authorize(user_id, &record)?;

                tx.execute("DELETE FROM conversations WHERE id = ?1", rusqlite::params![id])?;
                append_audit(&tx, Some(user_id), "conversation.delete", &format!("id={id}"))?;
                tx.commit()?;

                info!(conversation_id = id, user_id, "conversation deleted");
                Ok(())
            })
            .await
    }

    // ── continuation chains ──────────────────────────────────────────

    /// Create a continuation of `old_id`: a fresh conversation owned by the
    /// same user, carrying `summary` and `continued_from`, with the old
    /// conversation archived.  Cross-user continuations are rejected.
    #[instrument(skip(self, summary))]
    pub async fn create_continuation(
        &self,
        user_id: i64,
        old_id: i64,
        summary: &str,
    ) -> StoreResult<i64> {
        let summary = summary.to_string();
        let now = Utc::now().timestamp_millis();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let old = fetch_record(&tx, old_id)?;
                authorize(user_id, &old)?;

                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM conversations WHERE continued_from = ?1",
                        rusqlite::params![old_id],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(ignore_no_rows)?;
                if let Some(existing) = existing {
                    return Err(StoreError::InvalidArgument(format!(
                        "conversation {old_id} already continues into {existing}"
                    )));
                }

                // Strictly after the predecessor, so listings order the
                // chain correctly even within one millisecond.
                let new_updated = now.max(old.updated_at + 1);

                tx.execute(
                    "INSERT INTO conversations \
                     (user_id, title, origin, private, continued_from, summary, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        user_id,
                        old.title,
                        old.origin,
                        old.private,
                        old_id,
                        summary,
                        now,
                        new_updated
                    ],
                )?;
                let new_id = tx.last_insert_rowid();

                tx.execute(
                    "UPDATE conversations SET archived = 1 WHERE id = ?1",
                    rusqlite::params![old_id],
                )?;

                append_audit(
                    &tx,
                    Some(user_id),
                    "conversation.continue",
                    &format!("old={old_id} new={new_id}"),
                )?;
                tx.commit()?;

                info!(old_id, new_id, "conversation continued");
                Ok(new_id)
            })
            .await
    }

    /// Reverse lookup: the conversation that continues `old_id`, if any.
    #[instrument(skip(self))]
    pub async fn find_continuation(&self, user_id: i64, old_id: i64) -> StoreResult<Option<i64>> {
        self.db
            .execute(move |conn| {
                let old = fetch_record(conn, old_id)?;
                authorize(user_id, &old)?;

                conn.query_row(
                    "SELECT id FROM conversations WHERE continued_from = ?1",
                    rusqlite::params![old_id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(ignore_no_rows)
            })
            .await
    }

    // ── search ───────────────────────────────────────────────────────

    /// Title search over the user's conversations.
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        user_id: i64,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> StoreResult<Vec<ConversationRecord>> {
        let pattern = format!("%{query}%");
        self.db
            .execute(move |conn| {
                let sql = format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations \
                     WHERE user_id = ?1 AND title LIKE ?2 \
                     ORDER BY updated_at DESC, id DESC LIMIT ?3 OFFSET ?4"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(
                        rusqlite::params![user_id, pattern, limit, offset],
                        row_to_record,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Message-body search over the user's conversations.
    #[instrument(skip(self))]
    pub async fn search_content(
        &self,
        user_id: i64,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> StoreResult<Vec<ConversationRecord>> {
        let pattern = format!("%{query}%");
        self.db
            .execute(move |conn| {
                let sql = format!(
                    "SELECT DISTINCT {columns} FROM conversations c \
                     JOIN messages m ON m.conversation_id = c.id \
                     WHERE c.user_id = ?1 AND m.content LIKE ?2 \
                     ORDER BY c.updated_at DESC, c.id DESC LIMIT ?3 OFFSET ?4",
                    columns = CONVERSATION_COLUMNS
                        .split(", ")
                        .map(|col| format!("c.{col}"))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(
                        rusqlite::params![user_id, pattern, limit, offset],
                        row_to_record,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    // ── admin ────────────────────────────────────────────────────────

    /// Reassign a conversation to another user.  Admin-only; the caller is
    /// responsible for the privilege check.  Locked settings are preserved
    /// (they describe how the history was produced, not who owns it).
    #[instrument(skip(self))]
    pub async fn reassign(&self, conv_id: i64, new_user_id: i64) -> StoreResult<()> {
        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                // Both the conversation and the target user must exist.
                let record = fetch_record(&tx, conv_id)?;
                let user_exists: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM users WHERE id = ?1",
                    rusqlite::params![new_user_id],
                    |row| row.get(0),
                )?;
                if user_exists == 0 {
                    return Err(StoreError::NotFound {
                        entity: "user",
                        id: new_user_id,
                    });
                }

                tx.execute(
                    "UPDATE conversations SET user_id = ?2 WHERE id = ?1",
                    rusqlite::params![conv_id, new_user_id],
                )?;
                append_audit(
                    &tx,
                    None,
                    "conversation.reassign",
                    &format!("id={conv_id} from={} to={new_user_id}", record.user_id),
                )?;
                tx.commit()?;

                info!(conv_id, new_user_id, "conversation reassigned");
                Ok(())
            })
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Helpers
// ═══════════════════════════════════════════════════════════════════════

fn fetch_record(conn: &Connection, id: i64) -> StoreResult<ConversationRecord> {
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1");
    conn.query_row(&sql, rusqlite::params![id], row_to_record)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                entity: "conversation",
                id,
            },
            other => StoreError::Sqlite(other),
        })
}

fn authorize(user_id: i64, record: &ConversationRecord) -> StoreResult<()> {
    if record.user_id != user_id {
        info!(
            conversation_id = record.id,
            owner = record.user_id,
            acting = user_id,
            "ownership check failed"
        );
        return Err(StoreError::Forbidden {
            entity: "conversation",
            id: record.id,
        });
    }
    Ok(())
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn ignore_no_rows<T>(e: rusqlite::Error) -> StoreResult<Option<T>> {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(StoreError::Sqlite(other)),
    }
}

/// Append an audit row inside the caller's transaction.
pub(crate) fn append_audit(
    conn: &Connection,
    user_id: Option<i64>,
    action: &str,
    detail: &str,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO audit_log (user_id, action, detail, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![user_id, action, detail, Utc::now().timestamp_millis()],
    )?;
    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────
