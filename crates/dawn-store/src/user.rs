//! Minimal user accounts.
//!
//! The store needs users only as conversation owners and for the login
//! bookkeeping the maintenance pass prunes.  Credential handling (password
//! hashing, token generation) lives with the web front-end, outside this
//! crate.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// A user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Row id; conversation ownership references this.
    pub id: i64,
    /// Unique login name.
    pub username: String,
    /// "admin" or "user".
    pub role: String,
    /// Whether the user can log in.
    pub active: bool,
    /// Milliseconds since epoch.
    pub created_at: i64,
    /// Milliseconds since epoch.
    pub updated_at: i64,
}

impl User {
    /// Whether this account may perform admin-only store operations.
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// CRUD operations on user accounts.
#[derive(Clone)]
pub struct UserStore {
    db: Database,
}

impl UserStore {
    /// Create a user store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user.  Fails on a duplicate username.
    #[instrument(skip(self))]
    pub async fn create(&self, username: &str, role: &str) -> StoreResult<User> {
        if username.is_empty() {
            return Err(StoreError::InvalidArgument("username must not be empty".into()));
        }
        let username = username.to_string();
        let role = role.to_string();
        let now = Utc::now().timestamp_millis();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO users (username, role, active, created_at, updated_at) \
                     VALUES (?1, ?2, 1, ?3, ?3)",
                    rusqlite::params![username, role, now],
                )?;
                let id = conn.last_insert_rowid();
                debug!(user_id = id, "user created");
                Ok(User {
                    id,
                    username,
                    role,
                    active: true,
                    created_at: now,
                    updated_at: now,
                })
            })
            .await
    }

    /// Fetch a user by id.
    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> StoreResult<User> {
        self.db
            .execute(move |conn| {
                conn.query_row(
                    "SELECT id, username, role, active, created_at, updated_at \
                     FROM users WHERE id = ?1",
                    rusqlite::params![id],
                    |row| {
                        Ok(User {
                            id: row.get(0)?,
                            username: row.get(1)?,
                            role: row.get(2)?,
                            active: row.get(3)?,
                            created_at: row.get(4)?,
                            updated_at: row.get(5)?,
                        })
                    },
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                        entity: "user",
                        id,
                    },
                    other => StoreError::Sqlite(other),
                })
            })
            .await
    }

    /// Fetch a user by username, if one exists.
    #[instrument(skip(self))]
    pub async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let username = username.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT id, username, role, active, created_at, updated_at \
                     FROM users WHERE username = ?1",
                    rusqlite::params![username],
                    |row| {
                        Ok(User {
                            id: row.get(0)?,
                            username: row.get(1)?,
                            role: row.get(2)?,
                            active: row.get(3)?,
                            created_at: row.get(4)?,
                            updated_at: row.get(5)?,
                        })
                    },
                );
                match result {
                    Ok(user) => Ok(Some(user)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// Record a login attempt for the maintenance pass to prune later.
    #[instrument(skip(self))]
    pub async fn record_login_attempt(
        &self,
        username: &str,
        remote_addr: Option<&str>,
        success: bool,
    ) -> StoreResult<()> {
        let username = username.to_string();
        let remote_addr = remote_addr.map(str::to_string);
        let now = Utc::now().timestamp_millis();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO login_attempts (username, remote_addr, success, created_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![username, remote_addr, success, now],
                )?;
                Ok(())
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────
