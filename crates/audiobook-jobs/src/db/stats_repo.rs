//! Aggregate statistics, read from the `job_statistics` view.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{Database, DatabaseError};

/// Aggregates for one job status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusStats {
    pub count: u64,
    /// Mean over jobs that recorded a processing time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_processing_time: Option<f64>,
    pub total_output_bytes: u64,
}

/// Statistics keyed by status string. Statuses with no jobs are absent.
pub fn by_status(db: &Database) -> Result<BTreeMap<String, StatusStats>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT status, job_count, avg_processing_time, total_output_bytes
             FROM job_statistics",
        )?;
        let rows = stmt.query_map([], |row| {
            let count: i64 = row.get(1)?;
            let total: i64 = row.get(3)?;
            Ok((
                row.get::<_, String>(0)?,
                StatusStats {
                    count: count.max(0) as u64,
                    avg_processing_time: row.get(2)?,
                    total_output_bytes: total.max(0) as u64,
                },
            ))
        })?;

        let mut stats = BTreeMap::new();
        for row in rows {
            let (status, entry) = row?;
            stats.insert(status, entry);
        }
        Ok(stats)
    })
}
