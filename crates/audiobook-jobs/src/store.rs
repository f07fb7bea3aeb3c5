//! Job store with persistent database storage.
//!
//! Maps raw repository rows to typed records. This is the only module that
//! knows how typed fields are laid out in columns.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::db::file_repo::{self, FileRow};
use crate::db::job_repo::{self, JobFilter, JobOrder, JobRow};
use crate::db::stats_repo::{self, StatusStats};
use crate::db::{log_repo, worker_repo, Database, DatabaseError};
use crate::error::QueueError;
use crate::jobs::{
    InputDescriptor, Job, JobProgress, JobStatus, OutputDescriptor, OutputFormat, SourceKind,
};
use crate::logger::{LogEntry, LogLevel};

// ─── Helpers ────────────────────────────────────────────────────────────────

pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    // Fixed-width UTC so lexical order in SQL equals chronological order.
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

fn parse_opt_timestamp(s: Option<&str>) -> Option<DateTime<Utc>> {
    s.map(parse_timestamp)
}

fn parse_enum<T: FromStr>(column: &'static str, value: &str) -> Result<T, DatabaseError> {
    value.parse().map_err(|_| DatabaseError::CorruptValue {
        column,
        value: value.to_string(),
    })
}

fn to_json<T: Serialize>(column: &'static str, value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::serialization(column, e))
}

fn to_opt_json<T: Serialize>(
    column: &'static str,
    value: Option<&T>,
) -> Result<Option<String>, DatabaseError> {
    value.map(|v| to_json(column, v)).transpose()
}

fn from_json<T: DeserializeOwned>(column: &'static str, raw: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::serialization(column, e))
}

fn from_opt_json<T: DeserializeOwned>(
    column: &'static str,
    raw: Option<&str>,
) -> Result<Option<T>, DatabaseError> {
    raw.map(|r| from_json(column, r)).transpose()
}

fn job_to_row(job: &Job) -> Result<JobRow, DatabaseError> {
    let progress = &job.progress;
    Ok(JobRow {
        id: job.id.clone(),
        status: job.status.as_str().to_string(),
        created_at: format_timestamp(job.created_at),
        started_at: job.started_at.map(format_timestamp),
        completed_at: job.completed_at.map(format_timestamp),
        updated_at: format_timestamp(Utc::now()),
        input_path: job.input.path.to_string_lossy().into_owned(),
        input_kind: job.input.kind.as_str().to_string(),
        input_size: job.input.size as i64,
        output_path: job.output.path.to_string_lossy().into_owned(),
        output_format: job.output.format.as_str().to_string(),
        output_size: job.output.size.map(|s| s as i64),
        processing_options: to_json("processing_options", &job.processing_options)?,
        audiobook_options: to_opt_json("audiobook_options", job.audiobook_options.as_ref())?,
        progress: to_json("progress", progress)?,
        metadata: to_opt_json("metadata", job.metadata.as_ref())?,
        error_info: to_opt_json("error_info", job.error_info.as_ref())?,
        resume_data: to_opt_json("resume_data", job.resume_data.as_ref())?,
        processing_time_seconds: job.processing_time_seconds,
        total_chapters: i64::from(progress.total_chapters),
        completed_chapters: i64::from(progress.completed_chapters),
        total_chunks: progress.total_chunks as i64,
        completed_chunks: progress.completed_chunks as i64,
        claimed_by: job.claimed_by.clone(),
    })
}

fn row_to_job(row: JobRow) -> Result<Job, DatabaseError> {
    let progress: JobProgress = from_json("progress", &row.progress)?;
    Ok(Job {
        status: parse_enum("status", &row.status)?,
        created_at: parse_timestamp(&row.created_at),
        started_at: parse_opt_timestamp(row.started_at.as_deref()),
        completed_at: parse_opt_timestamp(row.completed_at.as_deref()),
        input: InputDescriptor {
            path: PathBuf::from(row.input_path),
            kind: parse_enum::<SourceKind>("input_kind", &row.input_kind)?,
            size: row.input_size.max(0) as u64,
        },
        output: OutputDescriptor {
            path: PathBuf::from(row.output_path),
            format: parse_enum::<OutputFormat>("output_format", &row.output_format)?,
            size: row.output_size.map(|s| s.max(0) as u64),
        },
        processing_options: from_json("processing_options", &row.processing_options)?,
        audiobook_options: from_opt_json("audiobook_options", row.audiobook_options.as_deref())?,
        progress,
        metadata: from_opt_json("metadata", row.metadata.as_deref())?,
        error_info: from_opt_json("error_info", row.error_info.as_deref())?,
        resume_data: from_opt_json("resume_data", row.resume_data.as_deref())?,
        processing_time_seconds: row.processing_time_seconds,
        claimed_by: row.claimed_by,
        id: row.id,
    })
}

fn rows_to_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>, DatabaseError> {
    rows.into_iter().map(row_to_job).collect()
}

// ─── Auxiliary records ──────────────────────────────────────────────────────

/// What a tracked file is to its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Input,
    Output,
    /// A spooled chunk of synthesized audio.
    Chunk,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Input => "input",
            FileKind::Output => "output",
            FileKind::Chunk => "chunk",
        }
    }
}

impl FromStr for FileKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(FileKind::Input),
            "output" => Ok(FileKind::Output),
            "chunk" => Ok(FileKind::Chunk),
            _ => Err(()),
        }
    }
}

/// A file recorded against a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFile {
    pub path: PathBuf,
    pub kind: FileKind,
    pub size: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Processing,
}

/// Liveness record of one worker process.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub current_job_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub state: WorkerState,
}

impl WorkerHeartbeat {
    fn from_row(row: worker_repo::WorkerRow) -> Self {
        Self {
            state: if row.status == "processing" {
                WorkerState::Processing
            } else {
                WorkerState::Idle
            },
            started_at: parse_timestamp(&row.started_at),
            last_heartbeat: parse_timestamp(&row.last_heartbeat),
            current_job_id: row.current_job_id,
            worker_id: row.worker_id,
        }
    }
}

/// Statistics per status, with every status present.
pub type Statistics = BTreeMap<String, StatusStats>;

// ─── JobStore ───────────────────────────────────────────────────────────────

/// Typed access to jobs, logs, tracked files and heartbeats.
///
/// Cheap to clone. A clone shares the underlying connection; use
/// [`JobStore::reopen`] to get an independent connection for another worker
/// thread.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Database::open(path).map(Self::new)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Database::open_in_memory().map(Self::new)
    }

    /// A store over a fresh connection to the same database file.
    pub fn reopen(&self) -> Result<Self, DatabaseError> {
        self.db.reopen().map(Self::new)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ── Jobs ──

    /// Inserts a new job in `queued` state and returns its id.
    pub fn create_job(&self, job: &Job) -> Result<String, QueueError> {
        if job.input.path.as_os_str().is_empty() {
            return Err(QueueError::validation("Input path must not be empty"));
        }
        if job.output.path.as_os_str().is_empty() {
            return Err(QueueError::validation("Output path must not be empty"));
        }

        let mut row = job_to_row(job)?;
        row.status = JobStatus::Queued.as_str().to_string();
        job_repo::insert(&self.db, &row)?;
        Ok(row.id)
    }

    pub fn get_job(&self, id: &str) -> Result<Option<Job>, DatabaseError> {
        job_repo::find_by_id(&self.db, id)?.map(row_to_job).transpose()
    }

    /// Writes every mutable field. Rejected if the status change is not an
    /// allowed transition.
    pub fn update_job(&self, job: &Job) -> Result<(), DatabaseError> {
        job_repo::update(&self.db, &job_to_row(job)?, None)
    }

    /// Like [`update_job`](Self::update_job), but only while `worker_id`
    /// still holds the claim. Otherwise fails with
    /// [`DatabaseError::OwnershipLost`].
    pub fn update_claimed_job(&self, job: &Job, worker_id: &str) -> Result<(), DatabaseError> {
        job_repo::update(&self.db, &job_to_row(job)?, Some(worker_id))
    }

    /// Writes progress, resume data and counters, never status, while
    /// `worker_id` holds the claim. Returns the stored status after the
    /// write.
    pub fn update_progress(&self, job: &Job, worker_id: &str) -> Result<JobStatus, DatabaseError> {
        let status = job_repo::update_progress(&self.db, &job_to_row(job)?, Some(worker_id))?;
        parse_enum("status", &status)
    }

    pub fn job_status(&self, id: &str) -> Result<Option<JobStatus>, DatabaseError> {
        job_repo::status_of(&self.db, id)?
            .map(|s| parse_enum("status", &s))
            .transpose()
    }

    /// Deletes a job with its logs and file records. Returns whether it existed.
    pub fn delete_job(&self, id: &str) -> Result<bool, DatabaseError> {
        job_repo::delete(&self.db, id)
    }

    /// Jobs newest first, optionally restricted to one status.
    pub fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: Option<u64>,
    ) -> Result<Vec<Job>, DatabaseError> {
        let filter = JobFilter {
            statuses: status.map(|s| vec![s.as_str().to_string()]).unwrap_or_default(),
            limit,
            ..Default::default()
        };
        rows_to_jobs(job_repo::list(&self.db, &filter)?)
    }

    /// Queued, running and paused jobs, oldest first.
    pub fn active_jobs(&self) -> Result<Vec<Job>, DatabaseError> {
        let filter = JobFilter {
            statuses: JobStatus::ACTIVE
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
            order: JobOrder::OldestFirst,
            ..Default::default()
        };
        rows_to_jobs(job_repo::list(&self.db, &filter)?)
    }

    /// Completed jobs, most recently finished first.
    pub fn completed_jobs(&self, limit: Option<u64>) -> Result<Vec<Job>, DatabaseError> {
        let filter = JobFilter {
            statuses: vec![JobStatus::Completed.as_str().to_string()],
            order: JobOrder::RecentlyCompleted,
            limit,
            ..Default::default()
        };
        rows_to_jobs(job_repo::list(&self.db, &filter)?)
    }

    /// Failed jobs that are eligible for resume.
    pub fn resumable_jobs(&self) -> Result<Vec<Job>, DatabaseError> {
        let filter = JobFilter {
            statuses: vec![JobStatus::Failed.as_str().to_string()],
            order: JobOrder::RecentlyCompleted,
            ..Default::default()
        };
        let jobs = rows_to_jobs(job_repo::list(&self.db, &filter)?)?;
        Ok(jobs.into_iter().filter(Job::can_be_resumed).collect())
    }

    /// Atomically moves the oldest queued job to `running` and returns it.
    pub fn claim_next_queued(&self) -> Result<Option<Job>, DatabaseError> {
        self.claim_next(None)
    }

    /// Like [`claim_next_queued`](Self::claim_next_queued), recording which
    /// worker took the job.
    pub fn claim_next_queued_by(&self, worker_id: &str) -> Result<Option<Job>, DatabaseError> {
        self.claim_next(Some(worker_id))
    }

    fn claim_next(&self, worker_id: Option<&str>) -> Result<Option<Job>, DatabaseError> {
        let now = format_timestamp(Utc::now());
        job_repo::claim_next(&self.db, worker_id, &now)?
            .map(row_to_job)
            .transpose()
    }

    /// Resets a job to `queued`, clearing timestamps and error info.
    pub fn requeue_job(&self, id: &str) -> Result<(), DatabaseError> {
        job_repo::requeue(&self.db, id, None, &format_timestamp(Utc::now()))
    }

    /// Hands a running job back to the queue on behalf of the worker that
    /// claimed it.
    pub fn release_job(&self, id: &str, worker_id: &str) -> Result<(), DatabaseError> {
        job_repo::requeue(&self.db, id, Some(worker_id), &format_timestamp(Utc::now()))
    }

    /// Marks an active job `cancelled`. Returns false if it was not active.
    pub fn cancel_job(&self, id: &str) -> Result<bool, DatabaseError> {
        job_repo::cancel(&self.db, id, &format_timestamp(Utc::now()))
    }

    /// Removes completed jobs whose completion is older than `age`.
    pub fn delete_completed_older_than(&self, age: Duration) -> Result<Vec<String>, DatabaseError> {
        let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        job_repo::delete_completed_before(&self.db, &format_timestamp(cutoff))
    }

    // ── Logs ──

    pub fn add_log(
        &self,
        job_id: &str,
        level: LogLevel,
        message: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<(), DatabaseError> {
        let metadata = to_opt_json("metadata", metadata)?;
        log_repo::insert(
            &self.db,
            job_id,
            &format_timestamp(Utc::now()),
            level.as_str(),
            message,
            metadata.as_deref(),
        )
    }

    /// Log entries newest first. An empty `levels` slice means every level.
    pub fn get_logs(
        &self,
        job_id: &str,
        levels: &[LogLevel],
        limit: Option<u64>,
    ) -> Result<Vec<LogEntry>, DatabaseError> {
        let levels: Vec<&str> = levels.iter().map(LogLevel::as_str).collect();
        log_repo::query(&self.db, job_id, &levels, limit)?
            .into_iter()
            .map(|row| {
                Ok(LogEntry {
                    level: parse_enum("level", &row.level)?,
                    timestamp: parse_timestamp(&row.timestamp),
                    metadata: from_opt_json("metadata", row.metadata.as_deref())?,
                    message: row.message,
                    job_id: row.job_id,
                })
            })
            .collect()
    }

    /// Retention cleanup for log entries older than `age`.
    pub fn delete_logs_older_than(&self, age: Duration) -> Result<usize, DatabaseError> {
        let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        log_repo::delete_before(&self.db, &format_timestamp(cutoff))
    }

    // ── Files ──

    pub fn add_job_file(
        &self,
        job_id: &str,
        path: &Path,
        kind: FileKind,
        size: Option<u64>,
    ) -> Result<(), DatabaseError> {
        file_repo::upsert(
            &self.db,
            &FileRow {
                job_id: job_id.to_string(),
                file_path: path.to_string_lossy().into_owned(),
                file_kind: kind.as_str().to_string(),
                file_size: size.map(|s| s as i64),
                created_at: format_timestamp(Utc::now()),
            },
        )
    }

    pub fn get_job_files(
        &self,
        job_id: &str,
        kind: Option<FileKind>,
    ) -> Result<Vec<JobFile>, DatabaseError> {
        file_repo::query(&self.db, job_id, kind.as_ref().map(FileKind::as_str))?
            .into_iter()
            .map(|row| {
                Ok(JobFile {
                    kind: parse_enum("file_kind", &row.file_kind)?,
                    size: row.file_size.map(|s| s.max(0) as u64),
                    created_at: parse_timestamp(&row.created_at),
                    path: PathBuf::from(row.file_path),
                })
            })
            .collect()
    }

    pub fn remove_job_files(&self, job_id: &str, kind: FileKind) -> Result<usize, DatabaseError> {
        file_repo::delete_kind(&self.db, job_id, kind.as_str())
    }

    // ── Heartbeats ──

    pub fn upsert_heartbeat(
        &self,
        worker_id: &str,
        current_job_id: Option<&str>,
    ) -> Result<(), DatabaseError> {
        worker_repo::upsert(
            &self.db,
            worker_id,
            current_job_id,
            &format_timestamp(Utc::now()),
        )
    }

    pub fn get_heartbeat(&self, worker_id: &str) -> Result<Option<WorkerHeartbeat>, DatabaseError> {
        Ok(worker_repo::find(&self.db, worker_id)?.map(WorkerHeartbeat::from_row))
    }

    pub fn list_heartbeats(&self) -> Result<Vec<WorkerHeartbeat>, DatabaseError> {
        Ok(worker_repo::list(&self.db)?
            .into_iter()
            .map(WorkerHeartbeat::from_row)
            .collect())
    }

    pub fn remove_heartbeat(&self, worker_id: &str) -> Result<bool, DatabaseError> {
        worker_repo::remove(&self.db, worker_id)
    }

    // ── Maintenance ──

    /// Count, mean processing time and output bytes for every status.
    pub fn statistics(&self) -> Result<Statistics, DatabaseError> {
        let mut stats = stats_repo::by_status(&self.db)?;
        for status in JobStatus::ALL {
            stats.entry(status.as_str().to_string()).or_default();
        }
        Ok(stats)
    }

    /// Reclaims free space in the database file.
    pub fn compact(&self) -> Result<(), DatabaseError> {
        self.db.vacuum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{BookMetadata, ErrorInfo, ResumeData};

    fn test_store() -> JobStore {
        JobStore::open_in_memory().expect("Failed to create test store")
    }

    fn sample_job(name: &str) -> Job {
        Job::new(
            InputDescriptor {
                path: PathBuf::from(format!("/books/{}.epub", name)),
                kind: SourceKind::Ebook,
                size: 2048,
            },
            OutputDescriptor {
                path: PathBuf::from(format!("/out/{}.m4a", name)),
                format: OutputFormat::M4a,
                size: None,
            },
        )
    }

    #[test]
    fn test_timestamp_format_is_sortable() {
        let a = "2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let b = a + chrono::Duration::microseconds(1);
        assert!(format_timestamp(a) < format_timestamp(b));
        assert_eq!(format_timestamp(a), "2026-01-01T00:00:00.000000Z");
    }

    #[test]
    fn test_create_and_get_preserves_fields() {
        let store = test_store();
        let mut job = sample_job("dune");
        job.metadata = Some(BookMetadata {
            title: Some("Dune".to_string()),
            ..Default::default()
        });
        let id = store.create_job(&job).unwrap();

        let loaded = store.get_job(&id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Queued);
        assert_eq!(loaded.input, job.input);
        assert_eq!(loaded.metadata, job.metadata);
        assert_eq!(loaded.processing_options, job.processing_options);
    }

    #[test]
    fn test_create_rejects_empty_paths() {
        let store = test_store();
        let mut job = sample_job("x");
        job.output.path = PathBuf::new();
        assert!(matches!(store.create_job(&job), Err(QueueError::Validation(_))));

        let mut job = sample_job("y");
        job.input.path = PathBuf::new();
        assert!(matches!(store.create_job(&job), Err(QueueError::Validation(_))));
    }

    #[test]
    fn test_failed_job_round_trip_and_resumable_listing() {
        let store = test_store();
        let id = store.create_job(&sample_job("a")).unwrap();
        let mut job = store.claim_next_queued().unwrap().unwrap();
        assert_eq!(job.id, id);

        let mut resume = ResumeData::new();
        resume.mark_chapter_completed(0);
        job.status = JobStatus::Failed;
        job.completed_at = Some(Utc::now());
        job.resume_data = Some(resume);
        job.error_info = Some(ErrorInfo::new("SynthesisError", "boom").recoverable("resume it"));
        store.update_job(&job).unwrap();

        let resumable = store.resumable_jobs().unwrap();
        assert_eq!(resumable.len(), 1);
        assert_eq!(resumable[0].resume_data.as_ref().unwrap().completed_chapters(), vec![0]);
    }

    #[test]
    fn test_active_and_completed_listings() {
        let store = test_store();
        let first = store.create_job(&sample_job("a")).unwrap();
        let second = store.create_job(&sample_job("b")).unwrap();

        let active: Vec<_> = store.active_jobs().unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(active, vec![first.clone(), second.clone()]);

        let mut job = store.claim_next_queued().unwrap().unwrap();
        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        job.output.size = Some(1234);
        store.update_job(&job).unwrap();

        let completed = store.completed_jobs(None).unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].output.size, Some(1234));

        let newest_first: Vec<_> = store.list_jobs(None, None).unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(newest_first, vec![second, first]);
    }

    #[test]
    fn test_logs_and_files() {
        let store = test_store();
        let id = store.create_job(&sample_job("a")).unwrap();

        let meta = serde_json::json!({ "chapter": 1 });
        store.add_log(&id, LogLevel::Info, "hello", None).unwrap();
        store.add_log(&id, LogLevel::Error, "oops", Some(&meta)).unwrap();

        let errors = store.get_logs(&id, &[LogLevel::Error], None).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].metadata, Some(meta));

        store
            .add_job_file(&id, Path::new("/spool/c0_0.wav"), FileKind::Chunk, Some(64))
            .unwrap();
        let files = store.get_job_files(&id, Some(FileKind::Chunk)).unwrap();
        assert_eq!(files[0].size, Some(64));
        assert_eq!(store.remove_job_files(&id, FileKind::Chunk).unwrap(), 1);
    }

    #[test]
    fn test_heartbeats() {
        let store = test_store();
        store.upsert_heartbeat("worker-1", None).unwrap();
        let hb = store.get_heartbeat("worker-1").unwrap().unwrap();
        assert_eq!(hb.state, WorkerState::Idle);

        assert_eq!(store.list_heartbeats().unwrap().len(), 1);
        assert!(store.remove_heartbeat("worker-1").unwrap());
        assert!(store.get_heartbeat("worker-1").unwrap().is_none());
    }

    #[test]
    fn test_statistics_has_every_status() {
        let store = test_store();
        store.create_job(&sample_job("a")).unwrap();
        let stats = store.statistics().unwrap();
        assert_eq!(stats.len(), JobStatus::ALL.len());
        assert_eq!(stats["queued"].count, 1);
        assert_eq!(stats["failed"].count, 0);
    }

    #[test]
    fn test_delete_completed_older_than_keeps_recent() {
        let store = test_store();
        store.create_job(&sample_job("a")).unwrap();
        let mut job = store.claim_next_queued().unwrap().unwrap();
        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now() - chrono::Duration::days(40));
        store.update_job(&job).unwrap();

        store.create_job(&sample_job("b")).unwrap();
        let mut recent = store.claim_next_queued().unwrap().unwrap();
        recent.status = JobStatus::Completed;
        recent.completed_at = Some(Utc::now());
        store.update_job(&recent).unwrap();

        let removed = store
            .delete_completed_older_than(Duration::from_secs(30 * 24 * 3600))
            .unwrap();
        assert_eq!(removed, vec![job.id]);
        assert!(store.get_job(&recent.id).unwrap().is_some());
        store.compact().unwrap();
    }
}
