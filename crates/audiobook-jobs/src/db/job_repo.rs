//! Job repository: CRUD and queue operations for the `jobs` table.
//!
//! Rows carry JSON columns as raw text; mapping to typed records happens in
//! [`crate::store`]. Every write that depends on the current status reads
//! and writes inside one IMMEDIATE transaction.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};
use crate::jobs::JobStatus;

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub status: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
    pub input_path: String,
    pub input_kind: String,
    pub input_size: i64,
    pub output_path: String,
    pub output_format: String,
    pub output_size: Option<i64>,
    pub processing_options: String,
    pub audiobook_options: Option<String>,
    pub progress: String,
    pub metadata: Option<String>,
    pub error_info: Option<String>,
    pub resume_data: Option<String>,
    pub processing_time_seconds: Option<f64>,
    pub total_chapters: i64,
    pub completed_chapters: i64,
    pub total_chunks: i64,
    pub completed_chunks: i64,
    pub claimed_by: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            updated_at: row.get("updated_at")?,
            input_path: row.get("input_path")?,
            input_kind: row.get("input_kind")?,
            input_size: row.get("input_size")?,
            output_path: row.get("output_path")?,
            output_format: row.get("output_format")?,
            output_size: row.get("output_size")?,
            processing_options: row.get("processing_options")?,
            audiobook_options: row.get("audiobook_options")?,
            progress: row.get("progress")?,
            metadata: row.get("metadata")?,
            error_info: row.get("error_info")?,
            resume_data: row.get("resume_data")?,
            processing_time_seconds: row.get("processing_time_seconds")?,
            total_chapters: row.get("total_chapters")?,
            completed_chapters: row.get("completed_chapters")?,
            total_chunks: row.get("total_chunks")?,
            completed_chunks: row.get("completed_chunks")?,
            claimed_by: row.get("claimed_by")?,
        })
    }
}

/// Sort order for job listings.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum JobOrder {
    #[default]
    NewestFirst,
    /// Claim order.
    OldestFirst,
    RecentlyCompleted,
}

impl JobOrder {
    fn sql(&self) -> &'static str {
        match self {
            JobOrder::NewestFirst => "created_at DESC, rowid DESC",
            JobOrder::OldestFirst => "created_at ASC, rowid ASC",
            JobOrder::RecentlyCompleted => "completed_at DESC, rowid DESC",
        }
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    /// Empty means any status.
    pub statuses: Vec<String>,
    pub order: JobOrder,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, status, created_at, started_at, completed_at, updated_at,
             input_path, input_kind, input_size, output_path, output_format, output_size,
             processing_options, audiobook_options, progress, metadata, error_info, resume_data,
             processing_time_seconds, total_chapters, completed_chapters, total_chunks,
             completed_chunks, claimed_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
            params![
                job.id,
                job.status,
                job.created_at,
                job.started_at,
                job.completed_at,
                job.updated_at,
                job.input_path,
                job.input_kind,
                job.input_size,
                job.output_path,
                job.output_format,
                job.output_size,
                job.processing_options,
                job.audiobook_options,
                job.progress,
                job.metadata,
                job.error_info,
                job.resume_data,
                job.processing_time_seconds,
                job.total_chapters,
                job.completed_chapters,
                job.total_chunks,
                job.completed_chunks,
                job.claimed_by,
            ],
        )?;
        Ok(())
    })
}

/// Overwrites the mutable fields of an existing job.
///
/// Fails with [`DatabaseError::InvalidTransition`] if the stored status may
/// not move to `job.status`, with [`DatabaseError::NotFound`] if the row is
/// gone, and with [`DatabaseError::OwnershipLost`] if `owner` is given and
/// the job is claimed by someone else. In every case nothing is written.
pub fn update(db: &Database, job: &JobRow, owner: Option<&str>) -> Result<(), DatabaseError> {
    db.with_tx(|tx| {
        let current = current_status(tx, &job.id)?.ok_or_else(|| DatabaseError::NotFound(job.id.clone()))?;
        if let Some(owner) = owner {
            check_owner(tx, &job.id, owner)?;
        }
        let next = parse_status(&job.status)?;
        if !current.can_transition_to(next) {
            return Err(DatabaseError::InvalidTransition {
                id: job.id.clone(),
                from: current.to_string(),
                to: next.to_string(),
            });
        }

        tx.execute(
            "UPDATE jobs SET status=?2, started_at=?3, completed_at=?4, updated_at=?5,
             output_size=?6, progress=?7, metadata=?8, error_info=?9, resume_data=?10,
             processing_time_seconds=?11, total_chapters=?12, completed_chapters=?13,
             total_chunks=?14, completed_chunks=?15, claimed_by=?16
             WHERE id=?1",
            params![
                job.id,
                job.status,
                job.started_at,
                job.completed_at,
                job.updated_at,
                job.output_size,
                job.progress,
                job.metadata,
                job.error_info,
                job.resume_data,
                job.processing_time_seconds,
                job.total_chapters,
                job.completed_chapters,
                job.total_chunks,
                job.completed_chunks,
                job.claimed_by,
            ],
        )?;
        Ok(())
    })
}

/// Writes progress, resume data and counters only, leaving status alone.
///
/// Returns the status stored at the time of the write so the caller can
/// notice a concurrent cancellation without a second round trip. With an
/// `owner`, the write only applies while that worker holds the claim.
pub fn update_progress(
    db: &Database,
    job: &JobRow,
    owner: Option<&str>,
) -> Result<String, DatabaseError> {
    db.with_tx(|tx| {
        let changed = tx.execute(
            "UPDATE jobs SET updated_at=?2, progress=?3, resume_data=?4, total_chapters=?5,
             completed_chapters=?6, total_chunks=?7, completed_chunks=?8
             WHERE id=?1 AND (?9 IS NULL OR claimed_by = ?9)",
            params![
                job.id,
                job.updated_at,
                job.progress,
                job.resume_data,
                job.total_chapters,
                job.completed_chapters,
                job.total_chunks,
                job.completed_chunks,
                owner,
            ],
        )?;
        if changed == 0 {
            return Err(match (current_status(tx, &job.id)?, owner) {
                (Some(_), Some(owner)) => DatabaseError::OwnershipLost {
                    id: job.id.clone(),
                    owner: owner.to_string(),
                },
                _ => DatabaseError::NotFound(job.id.clone()),
            });
        }
        let status: String =
            tx.query_row("SELECT status FROM jobs WHERE id = ?1", params![job.id], |r| r.get(0))?;
        Ok(status)
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| find_in(conn, id))
}

fn find_in(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Reads only the status column.
pub fn status_of(db: &Database, id: &str) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let status = conn
            .query_row("SELECT status FROM jobs WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?;
        Ok(status)
    })
}

/// Lists jobs matching the filter.
pub fn list(db: &Database, filter: &JobFilter) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        let where_clause = if filter.statuses.is_empty() {
            String::new()
        } else {
            let placeholders: Vec<String> = filter
                .statuses
                .iter()
                .map(|status| {
                    param_values.push(Box::new(status.clone()));
                    format!("?{}", param_values.len())
                })
                .collect();
            format!("WHERE status IN ({})", placeholders.join(", "))
        };

        // SQLite needs a LIMIT before OFFSET; -1 means unbounded.
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));

        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY {} LIMIT ?{} OFFSET ?{}",
            where_clause,
            filter.order.sql(),
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    })
}

/// Atomically claims the oldest queued job.
///
/// The select and the status flip run inside one IMMEDIATE transaction, so
/// no two callers, in this process or another, can receive the same job.
pub fn claim_next(
    db: &Database,
    worker_id: Option<&str>,
    now: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_tx(|tx| {
        let next: Option<String> = tx
            .query_row(
                "SELECT id FROM jobs WHERE status = 'queued'
                 ORDER BY created_at ASC, rowid ASC LIMIT 1",
                [],
                |r| r.get(0),
            )
            .optional()?;

        let Some(id) = next else {
            return Ok(None);
        };

        let changed = tx.execute(
            "UPDATE jobs SET status = 'running', started_at = ?2, completed_at = NULL,
             updated_at = ?2, claimed_by = ?3
             WHERE id = ?1 AND status = 'queued'",
            params![id, now, worker_id],
        )?;
        if changed == 0 {
            return Ok(None);
        }

        find_in(tx, &id)
    })
}

/// Puts a job back in the queue, clearing timestamps and error info but
/// keeping its resume data.
///
/// With an `owner`, only the worker holding the claim may requeue.
pub fn requeue(
    db: &Database,
    id: &str,
    owner: Option<&str>,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_tx(|tx| {
        let current = current_status(tx, id)?.ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;
        if let Some(owner) = owner {
            check_owner(tx, id, owner)?;
        }
        if !current.can_transition_to(JobStatus::Queued) {
            return Err(DatabaseError::InvalidTransition {
                id: id.to_string(),
                from: current.to_string(),
                to: JobStatus::Queued.to_string(),
            });
        }

        tx.execute(
            "UPDATE jobs SET status = 'queued', started_at = NULL, completed_at = NULL,
             error_info = NULL, claimed_by = NULL, updated_at = ?2
             WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    })
}

/// Cancels a job if it is still active. Returns whether anything changed.
pub fn cancel(db: &Database, id: &str, now: &str) -> Result<bool, DatabaseError> {
    db.with_tx(|tx| {
        let changed = tx.execute(
            "UPDATE jobs SET status = 'cancelled', completed_at = ?2, updated_at = ?2
             WHERE id = ?1 AND status IN ('queued', 'running', 'paused')",
            params![id, now],
        )?;
        Ok(changed > 0)
    })
}

/// Deletes a job; logs and file records cascade. Returns whether it existed.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_tx(|tx| {
        let changed = tx.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}

/// Deletes completed jobs whose `completed_at` is before `cutoff`.
///
/// Returns the ids that were removed.
pub fn delete_completed_before(db: &Database, cutoff: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_tx(|tx| {
        let ids: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM jobs WHERE status = 'completed' AND completed_at < ?1",
            )?;
            let ids = stmt
                .query_map(params![cutoff], |r| r.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };
        for id in &ids {
            tx.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        }
        Ok(ids)
    })
}

fn current_status(conn: &Connection, id: &str) -> Result<Option<JobStatus>, DatabaseError> {
    let status: Option<String> = conn
        .query_row("SELECT status FROM jobs WHERE id = ?1", params![id], |r| r.get(0))
        .optional()?;
    status.as_deref().map(parse_status).transpose()
}

fn check_owner(conn: &Connection, id: &str, owner: &str) -> Result<(), DatabaseError> {
    let claimed_by: Option<String> = conn
        .query_row("SELECT claimed_by FROM jobs WHERE id = ?1", params![id], |r| r.get(0))?;
    if claimed_by.as_deref() == Some(owner) {
        Ok(())
    } else {
        Err(DatabaseError::OwnershipLost {
            id: id.to_string(),
            owner: owner.to_string(),
        })
    }
}

fn parse_status(s: &str) -> Result<JobStatus, DatabaseError> {
    s.parse().map_err(|_| DatabaseError::CorruptValue {
        column: "status",
        value: s.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_job(id: &str, created_at: &str) -> JobRow {
        JobRow {
            id: id.to_string(),
            status: "queued".to_string(),
            created_at: created_at.to_string(),
            started_at: None,
            completed_at: None,
            updated_at: created_at.to_string(),
            input_path: "/tmp/book.txt".to_string(),
            input_kind: "text".to_string(),
            input_size: 42,
            output_path: "/tmp/book.wav".to_string(),
            output_format: "wav".to_string(),
            output_size: None,
            processing_options: "{}".to_string(),
            audiobook_options: None,
            progress: "{}".to_string(),
            metadata: None,
            error_info: None,
            resume_data: None,
            processing_time_seconds: None,
            total_chapters: 0,
            completed_chapters: 0,
            total_chunks: 0,
            completed_chunks: 0,
            claimed_by: None,
        }
    }

    const T1: &str = "2026-01-01T00:00:01.000000Z";
    const T2: &str = "2026-01-01T00:00:02.000000Z";
    const T3: &str = "2026-01-01T00:00:03.000000Z";

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let job = sample_job("j1", T1);
        insert(&db, &job).unwrap();

        let found = find_by_id(&db, "j1").unwrap().unwrap();
        assert_eq!(found, job);
        assert!(find_by_id(&db, "missing").unwrap().is_none());
    }

    #[test]
    fn test_claim_is_fifo_and_exclusive() {
        let db = test_db();
        insert(&db, &sample_job("late", T2)).unwrap();
        insert(&db, &sample_job("early", T1)).unwrap();

        let first = claim_next(&db, Some("w1"), T3).unwrap().unwrap();
        assert_eq!(first.id, "early");
        assert_eq!(first.status, "running");
        assert_eq!(first.started_at.as_deref(), Some(T3));
        assert_eq!(first.claimed_by.as_deref(), Some("w1"));

        let second = claim_next(&db, Some("w2"), T3).unwrap().unwrap();
        assert_eq!(second.id, "late");

        assert!(claim_next(&db, None, T3).unwrap().is_none());
    }

    #[test]
    fn test_update_rejects_illegal_transition() {
        let db = test_db();
        let mut job = sample_job("j1", T1);
        insert(&db, &job).unwrap();

        job.status = "completed".to_string();
        let err = update(&db, &job, None).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidTransition { .. }));

        let stored = find_by_id(&db, "j1").unwrap().unwrap();
        assert_eq!(stored.status, "queued");
    }

    #[test]
    fn test_update_missing_job() {
        let db = test_db();
        let job = sample_job("ghost", T1);
        assert!(matches!(update(&db, &job, None), Err(DatabaseError::NotFound(_))));
    }

    #[test]
    fn test_update_progress_keeps_status() {
        let db = test_db();
        let mut job = sample_job("j1", T1);
        insert(&db, &job).unwrap();
        assert!(cancel(&db, "j1", T2).unwrap());

        // A progress write carrying a stale status must not resurrect the job.
        job.status = "running".to_string();
        job.completed_chunks = 3;
        let status = update_progress(&db, &job, None).unwrap();
        assert_eq!(status, "cancelled");

        let stored = find_by_id(&db, "j1").unwrap().unwrap();
        assert_eq!(stored.status, "cancelled");
        assert_eq!(stored.completed_chunks, 3);
    }

    #[test]
    fn test_cancel_only_once() {
        let db = test_db();
        insert(&db, &sample_job("j1", T1)).unwrap();
        assert!(cancel(&db, "j1", T2).unwrap());
        assert!(!cancel(&db, "j1", T3).unwrap());
        assert!(!cancel(&db, "missing", T3).unwrap());
    }

    #[test]
    fn test_requeue_clears_claim_state() {
        let db = test_db();
        let mut job = sample_job("j1", T1);
        insert(&db, &job).unwrap();
        claim_next(&db, Some("w1"), T2).unwrap().unwrap();

        job = find_by_id(&db, "j1").unwrap().unwrap();
        job.status = "failed".to_string();
        job.error_info = Some("{\"kind\":\"SynthesisError\"}".to_string());
        job.resume_data = Some("{\"checkpoint_at\":\"2026-01-01T00:00:02Z\"}".to_string());
        job.completed_at = Some(T3.to_string());
        update(&db, &job, None).unwrap();

        requeue(&db, "j1", None, T3).unwrap();
        let stored = find_by_id(&db, "j1").unwrap().unwrap();
        assert_eq!(stored.status, "queued");
        assert!(stored.started_at.is_none());
        assert!(stored.completed_at.is_none());
        assert!(stored.error_info.is_none());
        assert!(stored.claimed_by.is_none());
        assert!(stored.resume_data.is_some());
    }

    #[test]
    fn test_requeue_terminal_job_fails() {
        let db = test_db();
        insert(&db, &sample_job("j1", T1)).unwrap();
        cancel(&db, "j1", T2).unwrap();
        assert!(matches!(
            requeue(&db, "j1", None, T3),
            Err(DatabaseError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_writes_from_a_replaced_claimant_are_rejected() {
        let db = test_db();
        insert(&db, &sample_job("j1", T1)).unwrap();
        let mut stale = claim_next(&db, Some("w1"), T2).unwrap().unwrap();
        requeue(&db, "j1", None, T2).unwrap();
        let current = claim_next(&db, Some("w2"), T3).unwrap().unwrap();
        assert_eq!(current.claimed_by.as_deref(), Some("w2"));

        stale.completed_chunks = 99;
        assert!(matches!(
            update_progress(&db, &stale, Some("w1")),
            Err(DatabaseError::OwnershipLost { .. })
        ));
        stale.status = "completed".to_string();
        assert!(matches!(
            update(&db, &stale, Some("w1")),
            Err(DatabaseError::OwnershipLost { .. })
        ));
        assert!(matches!(
            requeue(&db, "j1", Some("w1"), T3),
            Err(DatabaseError::OwnershipLost { .. })
        ));

        let stored = find_by_id(&db, "j1").unwrap().unwrap();
        assert_eq!(stored.status, "running");
        assert_eq!(stored.claimed_by.as_deref(), Some("w2"));
        assert_eq!(stored.completed_chunks, 0);

        assert_eq!(update_progress(&db, &current, Some("w2")).unwrap(), "running");
    }

    #[test]
    fn test_owned_progress_write_on_missing_job() {
        let db = test_db();
        let job = sample_job("ghost", T1);
        assert!(matches!(
            update_progress(&db, &job, Some("w1")),
            Err(DatabaseError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_filters_and_orders() {
        let db = test_db();
        insert(&db, &sample_job("a", T1)).unwrap();
        insert(&db, &sample_job("b", T2)).unwrap();
        insert(&db, &sample_job("c", T3)).unwrap();
        cancel(&db, "b", T3).unwrap();

        let all = list(&db, &JobFilter::default()).unwrap();
        let ids: Vec<_> = all.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        let queued = list(
            &db,
            &JobFilter {
                statuses: vec!["queued".to_string()],
                order: JobOrder::OldestFirst,
                ..Default::default()
            },
        )
        .unwrap();
        let ids: Vec<_> = queued.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);

        let limited = list(
            &db,
            &JobFilter {
                limit: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_delete_completed_before() {
        let db = test_db();
        let mut old = sample_job("old", T1);
        insert(&db, &old).unwrap();
        claim_next(&db, None, T1).unwrap();
        old = find_by_id(&db, "old").unwrap().unwrap();
        old.status = "completed".to_string();
        old.completed_at = Some(T1.to_string());
        update(&db, &old, None).unwrap();

        insert(&db, &sample_job("fresh", T2)).unwrap();

        let removed = delete_completed_before(&db, T2).unwrap();
        assert_eq!(removed, vec!["old".to_string()]);
        assert!(find_by_id(&db, "fresh").unwrap().is_some());
    }

    #[test]
    fn test_delete() {
        let db = test_db();
        insert(&db, &sample_job("j1", T1)).unwrap();
        assert!(delete(&db, "j1").unwrap());
        assert!(!delete(&db, "j1").unwrap());
        assert!(status_of(&db, "j1").unwrap().is_none());
    }
}
