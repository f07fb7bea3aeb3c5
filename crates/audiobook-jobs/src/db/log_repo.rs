//! Append-only job log repository for the `job_logs` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw log row.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub id: i64,
    pub job_id: String,
    pub timestamp: String,
    pub level: String,
    pub message: String,
    pub metadata: Option<String>,
}

impl LogRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            timestamp: row.get("timestamp")?,
            level: row.get("level")?,
            message: row.get("message")?,
            metadata: row.get("metadata")?,
        })
    }
}

/// Appends one entry.
pub fn insert(
    db: &Database,
    job_id: &str,
    timestamp: &str,
    level: &str,
    message: &str,
    metadata: Option<&str>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO job_logs (job_id, timestamp, level, message, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![job_id, timestamp, level, message, metadata],
        )?;
        Ok(())
    })
}

/// Entries for a job, newest first. An empty `levels` slice means any level.
pub fn query(
    db: &Database,
    job_id: &str,
    levels: &[&str],
    limit: Option<u64>,
) -> Result<Vec<LogRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(job_id.to_string())];

        let level_clause = if levels.is_empty() {
            String::new()
        } else {
            let placeholders: Vec<String> = levels
                .iter()
                .map(|level| {
                    param_values.push(Box::new(level.to_string()));
                    format!("?{}", param_values.len())
                })
                .collect();
            format!("AND level IN ({})", placeholders.join(", "))
        };

        param_values.push(Box::new(limit.map(|l| l as i64).unwrap_or(-1)));
        let sql = format!(
            "SELECT * FROM job_logs WHERE job_id = ?1 {}
             ORDER BY timestamp DESC, id DESC LIMIT ?{}",
            level_clause,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), LogRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Bulk retention cleanup. Returns the number of rows removed.
pub fn delete_before(db: &Database, cutoff: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute("DELETE FROM job_logs WHERE timestamp < ?1", params![cutoff])?;
        Ok(removed)
    })
}
