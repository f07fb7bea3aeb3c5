//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from database operations.
///
/// Any of these surfacing from a write means the transaction was rolled back
/// and the store is unchanged.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// A JSON column could not be encoded or decoded.
    #[error("Failed to (de)serialize column '{column}': {source}")]
    Serialization {
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A stored value does not map to a known enum variant.
    #[error("Corrupt value '{value}' in column '{column}'")]
    CorruptValue { column: &'static str, value: String },

    /// The referenced job does not exist.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// A status write would move the job along an edge the lifecycle forbids.
    #[error("Invalid status transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    /// The job is no longer claimed by the worker attempting the write.
    #[error("Job {id} is no longer claimed by {owner}")]
    OwnershipLost { id: String, owner: String },
}

impl DatabaseError {
    pub(crate) fn serialization(column: &'static str, source: serde_json::Error) -> Self {
        Self::Serialization { column, source }
    }

    /// Returns true if SQLite reported the database as busy or locked.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
        )
    }
}
