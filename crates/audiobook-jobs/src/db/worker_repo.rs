//! Worker liveness rows (`worker_status` table).

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw heartbeat row.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerRow {
    pub worker_id: String,
    pub current_job_id: Option<String>,
    pub started_at: String,
    pub last_heartbeat: String,
    pub status: String,
}

impl WorkerRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            worker_id: row.get("worker_id")?,
            current_job_id: row.get("current_job_id")?,
            started_at: row.get("started_at")?,
            last_heartbeat: row.get("last_heartbeat")?,
            status: row.get("status")?,
        })
    }
}

/// Inserts or refreshes a heartbeat. `started_at` is kept from the first
/// heartbeat of the worker.
pub fn upsert(
    db: &Database,
    worker_id: &str,
    current_job_id: Option<&str>,
    now: &str,
) -> Result<(), DatabaseError> {
    let status = if current_job_id.is_some() {
        "processing"
    } else {
        "idle"
    };
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO worker_status (worker_id, current_job_id, started_at, last_heartbeat, status)
             VALUES (?1, ?2, ?3, ?3, ?4)
             ON CONFLICT(worker_id) DO UPDATE SET
               current_job_id = excluded.current_job_id,
               last_heartbeat = excluded.last_heartbeat,
               status = excluded.status",
            params![worker_id, current_job_id, now, status],
        )?;
        Ok(())
    })
}

pub fn find(db: &Database, worker_id: &str) -> Result<Option<WorkerRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM worker_status WHERE worker_id = ?1",
                params![worker_id],
                WorkerRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

pub fn list(db: &Database) -> Result<Vec<WorkerRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM worker_status ORDER BY last_heartbeat DESC")?;
        let rows = stmt
            .query_map([], WorkerRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn remove(db: &Database, worker_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute(
            "DELETE FROM worker_status WHERE worker_id = ?1",
            params![worker_id],
        )?;
        Ok(removed > 0)
    })
}
