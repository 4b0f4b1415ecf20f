//! Versioned schema migrations.
//!
//! Each migration is a numbered block of SQL; the `_migrations` table
//! records which blocks a database file has already absorbed, so reopening
//! an up-to-date file is a no-op and an older file is walked forward block
//! by block.  Every block applies inside its own transaction.
//!
//! There is no walking backward: a file stamped with a version beyond
//! [`SCHEMA_VERSION`] was written by a newer build, and touching it would
//! risk the user's conversation history, so opening it is a fatal error.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// The schema version this build writes.  Bump together with [`MIGRATIONS`].
pub const SCHEMA_VERSION: u32 = 2;

/// A single migration definition.
struct Migration {
    /// Monotonically increasing version number (1, 2, 3, ...).
    version: u32,
    /// Human-readable description.
    description: &'static str,
    /// Raw SQL to execute. May contain multiple statements separated by `;`.
    sql: &'static str,
}

/// All migrations in order. Add new migrations to the end of this array.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "initial schema — users, conversations, messages",
        sql: r#"
            CREATE TABLE users (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                username   TEXT NOT NULL UNIQUE,
                role       TEXT NOT NULL DEFAULT 'user' CHECK(role IN ('admin', 'user')),
                active     BOOLEAN DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX idx_users_username ON users(username);

            CREATE TABLE conversations (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id             INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title               TEXT NOT NULL DEFAULT '',
                origin              TEXT NOT NULL DEFAULT 'webui',
                archived            BOOLEAN NOT NULL DEFAULT 0,
                private             BOOLEAN NOT NULL DEFAULT 0,
                continued_from      INTEGER REFERENCES conversations(id),
                summary             TEXT,
                llm_locked          BOOLEAN NOT NULL DEFAULT 0,
                llm_type            TEXT,
                llm_provider        TEXT,
                llm_model           TEXT,
                llm_tools_mode      TEXT,
                llm_thinking_mode   TEXT,
                context_tokens_used INTEGER NOT NULL DEFAULT 0,
                context_tokens_max  INTEGER NOT NULL DEFAULT 0,
                message_count       INTEGER NOT NULL DEFAULT 0,
                created_at          INTEGER NOT NULL,
                updated_at          INTEGER NOT NULL
            );
            CREATE INDEX idx_conversations_user ON conversations(user_id, updated_at DESC);
            CREATE INDEX idx_conversations_continued ON conversations(continued_from);

            CREATE TABLE messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                role            TEXT NOT NULL CHECK(role IN ('system','user','assistant','tool')),
                content         TEXT NOT NULL,
                created_at      INTEGER NOT NULL
            );
            CREATE INDEX idx_messages_conversation ON messages(conversation_id, id);
        "#,
    },
    Migration {
        version: 2,
        description: "auth bookkeeping and maintenance — sessions, login attempts, audit log, meta",
        sql: r#"
            CREATE TABLE auth_sessions (
                token      TEXT PRIMARY KEY,
                user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at INTEGER NOT NULL,
                last_seen  INTEGER NOT NULL
            );
            CREATE INDEX idx_auth_sessions_user ON auth_sessions(user_id);

            CREATE TABLE login_attempts (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                username    TEXT NOT NULL,
                remote_addr TEXT,
                success     BOOLEAN NOT NULL,
                created_at  INTEGER NOT NULL
            );
            CREATE INDEX idx_login_attempts_time ON login_attempts(created_at);

            CREATE TABLE audit_log (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id    INTEGER,
                action     TEXT NOT NULL,
                detail     TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX idx_audit_log_time ON audit_log(created_at);

            CREATE TABLE store_meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
        "#,
    },
];

// ── public API ───────────────────────────────────────────────────────

/// Walk the database forward to [`SCHEMA_VERSION`].
///
/// Synchronous; the [`Database`](crate::db::Database) handle calls this
/// from the blocking pool.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )?;

    let stamped = current_version(conn)?;
    if stamped > SCHEMA_VERSION {
        return Err(StoreError::SchemaVersion {
            found: stamped,
            supported: SCHEMA_VERSION,
        });
    }
    if stamped == SCHEMA_VERSION {
        debug!(version = stamped, "schema already current");
        return Ok(());
    }

    info!(from = stamped, to = SCHEMA_VERSION, "migrating schema");
    for migration in MIGRATIONS.iter().filter(|m| m.version > stamped) {
        apply_one(conn, migration)?;
    }
    Ok(())
}

/// The version stamped on this database, 0 for a fresh file.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    let stamped: Option<u32> =
        conn.query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))?;
    Ok(stamped.unwrap_or(0))
}

// ── internals ────────────────────────────────────────────────────────

/// Apply one migration block transactionally and stamp it.
///
/// Dropping the transaction on any error path rolls the whole block back,
/// so a half-applied migration never reaches the file.
fn apply_one(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    let failed = |message: String| StoreError::Migration {
        version: migration.version,
        message,
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| failed(e.to_string()))?;

    tx.execute_batch(migration.sql)
        .map_err(|e| failed(format!("schema change failed: {e}")))?;
    tx.execute(
        "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            migration.version,
            migration.description,
            chrono::Utc::now().timestamp_millis()
        ],
    )
    .map_err(|e| failed(format!("could not stamp version: {e}")))?;

    tx.commit().map_err(|e| failed(e.to_string()))?;

    info!(
        version = migration.version,
        description = migration.description,
        "migration applied"
    );
    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    #[test]
    fn schema_version_matches_migration_list() {
        assert_eq!(MIGRATIONS.last().unwrap().version, SCHEMA_VERSION);
    }

    #[test]
    fn versions_strictly_increase() {
        for window in MIGRATIONS.windows(2) {
            assert!(
                window[1].version > window[0].version,
                "versions out of order at v{}",
                window[1].version,
            );
        }
    }

    #[test]
    fn fresh_file_walks_to_latest() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn second_run_is_a_no_op() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn future_schema_version_is_fatal() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, 'from the future', 0)",
            rusqlite::params![SCHEMA_VERSION + 1],
        )
        .unwrap();

        let err = run_all(&conn).unwrap_err();
        assert!(matches!(err, StoreError::SchemaVersion { .. }));
    }

    #[test]
    fn every_table_exists_after_migrating() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        for table in [
            "users",
            "conversations",
            "messages",
            "auth_sessions",
            "login_attempts",
            "audit_log",
            "store_meta",
        ] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .unwrap_or_else(|e| panic!("table {table} missing: {e}"));
            assert_eq!(count, 0, "table {table} should start empty");
        }
    }

    #[test]
    fn message_role_check_constraint() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO users (username, created_at, updated_at) VALUES ('u', 0, 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO conversations (user_id, created_at, updated_at) VALUES (1, 0, 0)",
            [],
        )
        .unwrap();

        let bad = conn.execute(
            "INSERT INTO messages (conversation_id, role, content, created_at) \
             VALUES (1, 'narrator', 'x', 0)",
            [],
        );
        assert!(bad.is_err());
    }
}
