//! Periodic store maintenance.
//!
//! Invoked by a background timer, never on the request path: purges rows
//! past their retention windows, consolidates the write-ahead log, and
//! optionally compacts storage.  Compaction is rate-limited through a
//! timestamp in `store_meta` so repeated invocations (timer restarts, the
//! CLI subcommand) cannot thrash the file.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// Login attempts are kept for 7 days.
pub const LOGIN_ATTEMPT_RETENTION_MS: i64 = 7 * 24 * 3600 * 1000;

/// Audit rows are kept for 30 days.
pub const AUDIT_RETENTION_MS: i64 = 30 * 24 * 3600 * 1000;

/// Auth sessions idle longer than 7 days are purged.
pub const AUTH_SESSION_IDLE_MS: i64 = 7 * 24 * 3600 * 1000;

/// Minimum interval between VACUUM passes.
pub const VACUUM_INTERVAL_MS: i64 = 24 * 3600 * 1000;

const LAST_VACUUM_KEY: &str = "last_vacuum_ms";

/// What one maintenance pass did.
#[derive(Debug, Default, Serialize)]
pub struct MaintenanceReport {
    /// Stale login-attempt rows removed.
    pub login_attempts_purged: usize,
    /// Expired audit rows removed.
    pub audit_rows_purged: usize,
    /// Idle auth sessions removed.
    pub auth_sessions_purged: usize,
}

/// One audit-log row, as dumped by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: i64,
    pub user_id: Option<i64>,
    pub action: String,
    pub detail: Option<String>,
    pub created_at: i64,
}

/// Purge stale rows and checkpoint the write-ahead log.
#[instrument(skip(db))]
pub async fn run_maintenance(db: &Database) -> StoreResult<MaintenanceReport> {
    let now = Utc::now().timestamp_millis();

    let report = db
        .execute(move |conn| {
            let login_attempts_purged = conn.execute(
                "DELETE FROM login_attempts WHERE created_at < ?1",
                rusqlite::params![now - LOGIN_ATTEMPT_RETENTION_MS],
            )?;
            let audit_rows_purged = conn.execute(
                "DELETE FROM audit_log WHERE created_at < ?1",
                rusqlite::params![now - AUDIT_RETENTION_MS],
            )?;
            let auth_sessions_purged = conn.execute(
                "DELETE FROM auth_sessions WHERE last_seen < ?1",
                rusqlite::params![now - AUTH_SESSION_IDLE_MS],
            )?;

            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;

            Ok(MaintenanceReport {
                login_attempts_purged,
                audit_rows_purged,
                auth_sessions_purged,
            })
        })
        .await?;

    info!(
        login_attempts = report.login_attempts_purged,
        audit_rows = report.audit_rows_purged,
        auth_sessions = report.auth_sessions_purged,
        "maintenance pass complete"
    );
    Ok(report)
}

/// Compact the database file.
///
/// Rate-limited to once per [`VACUUM_INTERVAL_MS`]; a premature call
/// returns [`StoreError::RateLimited`] with the remaining wait.
#[instrument(skip(db))]
pub async fn vacuum(db: &Database) -> StoreResult<()> {
    let now = Utc::now().timestamp_millis();

    db.execute(move |conn| {
        let last: Option<i64> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = ?1",
                rusqlite::params![LAST_VACUUM_KEY],
                |row| row.get::<_, String>(0),
            )
            .map(|v| v.parse().ok())
            .unwrap_or(None);

        if let Some(last) = last {
            let elapsed = now - last;
            if elapsed < VACUUM_INTERVAL_MS {
                return Err(StoreError::RateLimited {
                    operation: "vacuum",
                    wait_secs: (VACUUM_INTERVAL_MS - elapsed) / 1000,
                });
            }
        }

        conn.execute_batch("VACUUM;")?;
        conn.execute(
            "INSERT INTO store_meta (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![LAST_VACUUM_KEY, now.to_string()],
        )?;
        Ok(())
    })
    .await?;

    info!("database compacted");
    Ok(())
}

/// Dump the most recent audit rows, newest first.
#[instrument(skip(db))]
pub async fn dump_audit(db: &Database, limit: u32) -> StoreResult<Vec<AuditRecord>> {
    db.execute(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT id, user_id, action, detail, created_at \
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![limit], |row| {
                Ok(AuditRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    action: row.get(2)?,
                    detail: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
    .await
}

// ── tests ────────────────────────────────────────────────────────────
