//! Error types for the dawn-store crate.
//!
//! All storage operations return [`StoreError`] via [`StoreResult`].
//! [`StoreError::SchemaVersion`] and failed migrations are fatal for the
//! subsystem; everything else is returned to the caller.

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem operation failed (permissions, directory creation).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// The database was written by a newer schema than this build knows.
    #[error("database schema v{found} is newer than supported v{supported}")]
    SchemaVersion { found: u32, supported: u32 },

    /// The requested record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// The record exists but belongs to a different user.
    #[error("{entity} {id} is not accessible to this user")]
    Forbidden { entity: &'static str, id: i64 },

    /// A per-user quota was exceeded.
    #[error("limit exceeded: at most {limit} {entity} per user")]
    LimitExceeded { entity: &'static str, limit: u32 },

    /// A rate-limited maintenance operation was invoked too soon.
    #[error("rate limited: next {operation} allowed in {wait_secs} s")]
    RateLimited { operation: &'static str, wait_secs: i64 },

    /// An invalid argument was provided to a store operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
