//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order. The whole run happens inside one IMMEDIATE
//! transaction so two processes opening a fresh file cannot both apply
//! the same version.

use rusqlite::{Connection, TransactionBehavior};

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_jobs_table",
        sql: include_str!("sql/001_create_jobs.sql"),
    },
    Migration {
        version: 2,
        description: "create_job_logs_table",
        sql: include_str!("sql/002_create_job_logs.sql"),
    },
    Migration {
        version: 3,
        description: "create_job_files_table",
        sql: include_str!("sql/003_create_job_files.sql"),
    },
    Migration {
        version: 4,
        description: "create_worker_status_table",
        sql: include_str!("sql/004_create_worker_status.sql"),
    },
    Migration {
        version: 5,
        description: "create_statistics_views",
        sql: include_str!("sql/005_create_views.sql"),
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &mut Connection) -> Result<(), DatabaseError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = tx.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        tx.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    tx.commit()?;
    Ok(())
}
