//! Control-plane API over the job store.
//!
//! Client code (CLI, UI, HTTP layer) goes through [`JobManager`]; it
//! validates submissions before anything is persisted and logs every
//! state change it makes to the job's log.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::config::QueueConfig;
use crate::db::DatabaseError;
use crate::engine::DocumentExtractor;
use crate::error::QueueError;
use crate::extractor::ExtractorRegistry;
use crate::jobs::{
    AudiobookOptions, BookMetadata, InputDescriptor, Job, OutputDescriptor, OutputFormat,
    ProcessingOptions, SourceKind,
};
use crate::logger::{JobLogger, LogEntry, LogLevel};
use crate::store::{FileKind, JobStore, Statistics, WorkerHeartbeat};
use crate::worker::JobSpool;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Everything needed to submit a conversion.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub format: OutputFormat,
    pub processing_options: ProcessingOptions,
    pub audiobook_options: Option<AudiobookOptions>,
    /// Read from the document when absent.
    pub metadata: Option<BookMetadata>,
}

impl SubmitRequest {
    /// Default options; the format follows the output extension when it
    /// names one.
    pub fn new(input_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        let output_path = output_path.into();
        let format = output_path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|e| e.parse().ok())
            .unwrap_or_default();
        Self {
            input_path: input_path.into(),
            output_path,
            format,
            processing_options: ProcessingOptions::default(),
            audiobook_options: None,
            metadata: None,
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_processing_options(mut self, options: ProcessingOptions) -> Self {
        self.processing_options = options;
        self
    }

    pub fn with_audiobook_options(mut self, options: AudiobookOptions) -> Self {
        self.audiobook_options = Some(options);
        self
    }

    pub fn with_metadata(mut self, metadata: BookMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

pub struct JobManager {
    store: JobStore,
    extractor: Arc<dyn DocumentExtractor>,
    spool_dir: Option<PathBuf>,
}

impl JobManager {
    pub fn new(store: JobStore) -> Self {
        Self {
            store,
            extractor: Arc::new(ExtractorRegistry::new()),
            spool_dir: None,
        }
    }

    /// Opens the configured database and spool.
    pub fn from_config(config: &QueueConfig) -> Result<Self, QueueError> {
        let store = JobStore::open(&config.resolved_database_path()?)?;
        Ok(Self::new(store).with_spool_dir(config.resolved_spool_directory()?))
    }

    /// Extractor used to read metadata at submission.
    pub fn with_extractor(mut self, extractor: Arc<dyn DocumentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Spool root whose per-job directories are removed on delete.
    pub fn with_spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = Some(dir.into());
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    fn logger(&self, job_id: &str) -> JobLogger {
        JobLogger::new(job_id, self.store.clone())
    }

    // ─── Submission ───

    /// Validates and enqueues a conversion, returning the new job id.
    ///
    /// Nothing is persisted when validation fails. Unreadable document
    /// metadata does not block submission.
    pub fn submit_job(&self, request: SubmitRequest) -> Result<String, QueueError> {
        let input = request.input_path.as_path();
        let input_meta = fs::metadata(input)
            .ok()
            .filter(|m| m.is_file())
            .ok_or_else(|| {
                QueueError::validation(format!("Input file not found: {}", input.display()))
            })?;
        let kind = SourceKind::from_path(input).ok_or_else(|| {
            QueueError::validation(format!(
                "Unsupported input type: {} (expected .txt, .epub or .pdf)",
                input.display()
            ))
        })?;

        if request.output_path.as_os_str().is_empty() {
            return Err(QueueError::validation("Output path must not be empty"));
        }
        request.processing_options.validate()?;
        if let Some(options) = &request.audiobook_options {
            if !kind.is_book() {
                return Err(QueueError::validation(
                    "Audiobook options apply only to EPUB and PDF inputs",
                ));
            }
            options.validate()?;
        }

        let mut metadata_failure = None;
        let metadata = match request.metadata {
            Some(metadata) => Some(metadata),
            None if kind.is_book() => match self.extractor.read_metadata(input, kind) {
                Ok(metadata) if !metadata.is_empty() => Some(metadata),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(input = %input.display(), error = %e, "reading metadata failed");
                    metadata_failure = Some(e.to_string());
                    None
                }
            },
            None => None,
        };

        let mut job = Job::new(
            InputDescriptor {
                path: request.input_path.clone(),
                kind,
                size: input_meta.len(),
            },
            OutputDescriptor {
                path: request.output_path,
                format: request.format,
                size: None,
            },
        );
        job.processing_options = request.processing_options;
        job.audiobook_options = request.audiobook_options;
        job.metadata = metadata;

        let id = self.store.create_job(&job)?;
        if let Err(e) =
            self.store
                .add_job_file(&id, &job.input.path, FileKind::Input, Some(job.input.size))
        {
            tracing::warn!(job_id = %id, error = %e, "failed to record input file");
        }

        let logger = self.logger(&id);
        let title = job
            .metadata
            .as_ref()
            .map(BookMetadata::display_name)
            .unwrap_or_else(|| input.display().to_string());
        logger.info(
            &format!("Job submitted: {}", title),
            Some(json!({
                "input_path": job.input.path.display().to_string(),
                "input_kind": kind.as_str(),
                "output_path": job.output.path.display().to_string(),
                "output_format": job.output.format.as_str(),
                "voice": job.processing_options.voice.to_string(),
                "speed": job.processing_options.speed,
                "lang": job.processing_options.lang,
            })),
        );
        if let Some(reason) = metadata_failure {
            logger.warning(
                "Could not read book metadata, continuing without it",
                Some(json!({ "error": reason })),
            );
        }

        tracing::info!(job_id = %id, input = %job.input.path.display(), "job submitted");
        Ok(id)
    }

    // ─── Queries ───

    pub fn get_job(&self, id: &str) -> Result<Option<Job>, QueueError> {
        Ok(self.store.get_job(id)?)
    }

    /// Every job, newest first.
    pub fn get_all_jobs(&self, limit: Option<u64>) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.list_jobs(None, limit)?)
    }

    /// Queued, running and paused jobs in claim order.
    pub fn get_active_jobs(&self) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.active_jobs()?)
    }

    /// Completed jobs, most recently finished first.
    pub fn get_completed_jobs(&self, limit: Option<u64>) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.completed_jobs(limit)?)
    }

    /// Failed jobs that can be resumed.
    pub fn get_failed_jobs(&self) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.resumable_jobs()?)
    }

    pub fn get_job_logs(&self, id: &str, limit: Option<u64>) -> Result<Vec<LogEntry>, QueueError> {
        Ok(self.store.get_logs(id, &[], limit)?)
    }

    /// ERROR and CRITICAL entries, newest first.
    pub fn get_error_logs(&self, id: &str) -> Result<Vec<LogEntry>, QueueError> {
        Ok(self
            .store
            .get_logs(id, &[LogLevel::Error, LogLevel::Critical], None)?)
    }

    pub fn get_statistics(&self) -> Result<Statistics, QueueError> {
        Ok(self.store.statistics()?)
    }

    /// Liveness rows of every worker that has reported in.
    pub fn get_workers(&self) -> Result<Vec<WorkerHeartbeat>, QueueError> {
        Ok(self.store.list_heartbeats()?)
    }

    // ─── State changes ───

    /// Cancels a queued, running or paused job. Returns false otherwise.
    ///
    /// A running job stops at its next chunk boundary.
    pub fn cancel_job(&self, id: &str) -> Result<bool, QueueError> {
        let cancelled = self.store.cancel_job(id)?;
        if cancelled {
            self.logger(id).warning("Job cancelled by user", None);
            tracing::info!(job_id = %id, "job cancelled");
        } else {
            tracing::debug!(job_id = %id, "cancel ignored, job is not active");
        }
        Ok(cancelled)
    }

    /// Puts a resumable failed job back in the queue. Returns false when
    /// the job is missing or not eligible.
    pub fn resume_job(&self, id: &str) -> Result<bool, QueueError> {
        let Some(job) = self.store.get_job(id)? else {
            return Ok(false);
        };
        if !job.can_be_resumed() {
            tracing::debug!(job_id = %id, status = %job.status, "job is not resumable");
            return Ok(false);
        }

        match self.store.requeue_job(id) {
            Ok(()) => {}
            Err(DatabaseError::InvalidTransition { .. }) | Err(DatabaseError::NotFound(_)) => {
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        let (chapters_done, total_chapters) = job.banked_work();
        let chunks_done = job
            .resume_data
            .as_ref()
            .map(|r| r.completed_chunk_count())
            .unwrap_or(0);
        self.logger(id).info(
            &format!(
                "Job resumed: {}/{} chapters already completed",
                chapters_done, total_chapters
            ),
            Some(json!({
                "completed_chapters": chapters_done,
                "total_chapters": total_chapters,
                "completed_chunks_in_progress": chunks_done,
            })),
        );
        tracing::info!(job_id = %id, chapters_done, total_chapters, "job resumed");
        Ok(true)
    }

    /// Deletes a job with its logs. Spooled and tracked chunk files are
    /// removed from disk, best-effort.
    pub fn delete_job(&self, id: &str) -> Result<bool, QueueError> {
        let chunks = self.store.get_job_files(id, Some(FileKind::Chunk))?;
        let deleted = self.store.delete_job(id)?;
        if !deleted {
            return Ok(false);
        }

        for file in chunks {
            remove_file_quietly(&file.path);
        }
        if let Some(root) = &self.spool_dir {
            if let Err(e) = JobSpool::locate(root, id).remove() {
                tracing::warn!(job_id = %id, error = %e, "failed to remove spool");
            }
        }
        tracing::info!(job_id = %id, "job deleted");
        Ok(true)
    }

    /// Deletes completed jobs that finished more than `days` days ago, then
    /// prunes log entries older than the same cutoff from the jobs that
    /// remain. Returns how many jobs were removed.
    pub fn cleanup_old_jobs(&self, days: u32) -> Result<usize, QueueError> {
        let age = Duration::from_secs(u64::from(days) * SECONDS_PER_DAY);
        let removed = self.store.delete_completed_older_than(age)?;
        let pruned = self.store.delete_logs_older_than(age)?;
        if !removed.is_empty() || pruned > 0 {
            tracing::info!(jobs = removed.len(), log_entries = pruned, days, "cleaned up old jobs");
        }
        Ok(removed.len())
    }

    pub fn compact(&self) -> Result<(), QueueError> {
        Ok(self.store.compact()?)
    }
}

fn remove_file_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove file"),
    }
}
