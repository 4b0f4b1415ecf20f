//! SQLite connection handle.
//!
//! One connection per process, shared behind `Arc<Mutex<_>>`.  Async callers
//! hand closures to [`Database::execute`] / [`Database::execute_mut`], which
//! run them on tokio's blocking pool with the lock held; the single
//! connection doubles as the store's writer serialization.
//!
//! The database file holds private conversation history.  Opening a path
//! creates its directory `0700` and clamps the file itself to `0600`,
//! correcting looser permissions left by earlier runs or other tools.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Thread-safe handle to a SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database at `path`.
    ///
    /// Enforces file permissions and applies the connection pragmas.  Does
    /// blocking file I/O, so call it during startup or from the blocking
    /// pool.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
            enforce_mode(parent, 0o700)?;
        }

        let conn = Connection::open(path)?;
        enforce_mode(path, 0o600)?;
        configure(&conn)?;

        Ok(Self::wrap(conn))
    }

    /// Create an in-memory database — useful for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory database");
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        Ok(Self::wrap(conn))
    }

    /// Open the database and bring its schema up to date in one step.
    pub async fn open_and_migrate(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = tokio::task::spawn_blocking(move || Self::open(&path)).await??;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Apply any schema migrations the file has not seen yet.
    ///
    /// Fatal when the file records a schema newer than this build knows.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        self.execute(|conn| migration::run_all(conn)).await
    }

    /// Run a read or single-statement write against the connection.
    ///
    /// The closure executes on the blocking pool with the connection lock
    /// held, so async tasks never stall on SQLite I/O.  This is the primary
    /// entry point for store queries.
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn)?;
            f(&guard)
        })
        .await?
    }

    /// Like [`Database::execute`], but with `&mut Connection` so the closure
    /// can open a transaction for multi-statement writes.
    pub async fn execute_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            f(&mut guard)
        })
        .await?
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }
}

/// Take the connection lock, surfacing poisoning as a store error rather
/// than a panic.
fn lock(conn: &Arc<Mutex<Connection>>) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| StoreError::TaskJoin("a previous store operation panicked".into()))
}

/// Connection pragmas applied to every fresh connection.
fn configure(conn: &Connection) -> StoreResult<()> {
    // WAL keeps readers unblocked while the writer appends; under WAL,
    // NORMAL durability risks only the most recent transaction on power
    // loss, never corruption.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    // A second writer waits out the lock instead of failing immediately.
    conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

    // Scratch tables stay off the disk.
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    // Cascading deletes (conversation -> messages) rely on FK enforcement,
    // which SQLite leaves off by default.
    conn.pragma_update(None, "foreign_keys", "ON")?;

    Ok(())
}

/// Clamp `path`'s permissions to `mode` if they are looser.
#[cfg(unix)]
fn enforce_mode(path: &Path, mode: u32) -> StoreResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let current = std::fs::metadata(path)?.permissions().mode() & 0o777;
    if current & !mode != 0 {
        warn!(
            path = %path.display(),
            current = format!("{current:o}"),
            wanted = format!("{mode:o}"),
            "correcting loose file permissions"
        );
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn enforce_mode(_path: &Path, _mode: u32) -> StoreResult<()> {
    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────
