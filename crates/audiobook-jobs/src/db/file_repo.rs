//! Tracks files a job reads or produces (`job_files` table).

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw file-tracking row.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRow {
    pub job_id: String,
    pub file_path: String,
    pub file_kind: String,
    pub file_size: Option<i64>,
    pub created_at: String,
}

impl FileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            file_path: row.get("file_path")?,
            file_kind: row.get("file_kind")?,
            file_size: row.get("file_size")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Records a file. Re-recording the same path updates its size.
pub fn upsert(db: &Database, file: &FileRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO job_files (job_id, file_path, file_kind, file_size, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(job_id, file_path) DO UPDATE SET
               file_kind = excluded.file_kind,
               file_size = excluded.file_size",
            params![
                file.job_id,
                file.file_path,
                file.file_kind,
                file.file_size,
                file.created_at,
            ],
        )?;
        Ok(())
    })
}

/// Files for a job in insertion order, optionally restricted to one kind.
pub fn query(db: &Database, job_id: &str, kind: Option<&str>) -> Result<Vec<FileRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM job_files
             WHERE job_id = ?1 AND (?2 IS NULL OR file_kind = ?2)
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![job_id, kind], FileRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Forgets all files of one kind, e.g. spooled chunks after assembly.
pub fn delete_kind(db: &Database, job_id: &str, kind: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute(
            "DELETE FROM job_files WHERE job_id = ?1 AND file_kind = ?2",
            params![job_id, kind],
        )?;
        Ok(removed)
    })
}
