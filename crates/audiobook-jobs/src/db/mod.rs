//! Database module for persistent storage.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Database` handle. Every handle
//! owns exactly one connection; all access through a handle is serialized by
//! its `Mutex<Connection>`. Separate workers or processes open their own
//! handles and rely on SQLite's IMMEDIATE transactions for isolation.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};

pub mod error;
pub mod file_repo;
pub mod job_repo;
pub mod log_repo;
pub mod migrations;
pub mod stats_repo;
pub mod worker_repo;

pub use error::DatabaseError;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`) and shares the connection. WAL mode is
/// enabled so readers in other processes are not blocked by the writer.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let mut conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&mut conn)?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Opens a second, independent connection to the same database file.
    ///
    /// In-memory databases cannot be reopened; the handle is cloned instead.
    pub fn reopen(&self) -> Result<Self, DatabaseError> {
        match &self.path {
            Some(path) => Self::open(path),
            None => Ok(self.clone()),
        }
    }

    /// Path of the backing file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside an IMMEDIATE transaction.
    ///
    /// The write lock is taken at `BEGIN`, so a select-then-update inside `f`
    /// cannot interleave with another writer. The transaction commits only if
    /// `f` returns `Ok`; on error it is rolled back when dropped.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Reclaims free pages.
    pub fn vacuum(&self) -> Result<(), DatabaseError> {
        self.with_conn(|conn| {
            conn.execute_batch("VACUUM;")?;
            Ok(())
        })
    }
}

/// Returns the application directory: `~/.audiobook-jobs`.
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".audiobook-jobs"))
}

/// Returns the canonical database path: `~/.audiobook-jobs/jobs.db`.
pub fn default_database_path() -> Option<PathBuf> {
    default_data_dir().map(|d| d.join("jobs.db"))
}
