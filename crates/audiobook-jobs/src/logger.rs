//! Structured, job-scoped logging persisted through the [`JobStore`].

use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::db::DatabaseError;
use crate::error::render_trace;
use crate::store::JobStore;

/// Severity of a job log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            _ => Err(()),
        }
    }
}

/// One persisted log line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Logger bound to one job.
///
/// Writes never fail from the caller's point of view: if the store rejects
/// an entry, the entry is emitted through `tracing` instead.
#[derive(Clone)]
pub struct JobLogger {
    job_id: String,
    store: JobStore,
}

impl JobLogger {
    pub fn new(job_id: impl Into<String>, store: JobStore) -> Self {
        Self {
            job_id: job_id.into(),
            store,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Persists an entry and, if requested, mirrors it to the process log.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Option<Value>, also_print: bool) {
        let persisted = self
            .store
            .add_log(&self.job_id, level, message, metadata.as_ref());

        if let Err(e) = &persisted {
            tracing::warn!(
                target: "audiobook_jobs::job",
                job_id = %self.job_id,
                error = %e,
                "failed to persist job log entry"
            );
        }

        if also_print || persisted.is_err() {
            self.mirror(level, message, metadata.as_ref());
        }
    }

    fn mirror(&self, level: LogLevel, message: &str, metadata: Option<&Value>) {
        let job_id = self.job_id.as_str();
        let metadata = metadata.map(Value::to_string).unwrap_or_default();
        match level {
            LogLevel::Debug => {
                tracing::debug!(target: "audiobook_jobs::job", job_id, metadata = %metadata, "{}", message)
            }
            LogLevel::Info => {
                tracing::info!(target: "audiobook_jobs::job", job_id, metadata = %metadata, "{}", message)
            }
            LogLevel::Warning => {
                tracing::warn!(target: "audiobook_jobs::job", job_id, metadata = %metadata, "{}", message)
            }
            LogLevel::Error | LogLevel::Critical => {
                tracing::error!(
                    target: "audiobook_jobs::job",
                    job_id,
                    metadata = %metadata,
                    critical = level == LogLevel::Critical,
                    "{}",
                    message
                )
            }
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message, None, false);
    }

    pub fn info(&self, message: &str, metadata: Option<Value>) {
        self.log(LogLevel::Info, message, metadata, false);
    }

    pub fn warning(&self, message: &str, metadata: Option<Value>) {
        self.log(LogLevel::Warning, message, metadata, true);
    }

    pub fn error(&self, message: &str, metadata: Option<Value>) {
        self.log(LogLevel::Error, message, metadata, true);
    }

    pub fn critical(&self, message: &str, metadata: Option<Value>) {
        self.log(LogLevel::Critical, message, metadata, true);
    }

    /// `"{operation}: 3/10 (30.0%)"`.
    pub fn log_progress(&self, current: u64, total: u64, operation: &str) {
        let percentage = if total > 0 {
            current as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        self.info(
            &format!("{}: {}/{} ({:.1}%)", operation, current, total, percentage),
            Some(json!({
                "current": current,
                "total": total,
                "percentage": percentage,
            })),
        );
    }

    pub fn log_chapter_start(&self, index: usize, title: &str, total_chapters: usize) {
        self.info(
            &format!("Starting chapter {}/{}: {}", index + 1, total_chapters, title),
            Some(json!({
                "chapter_index": index,
                "chapter_name": title,
                "total_chapters": total_chapters,
            })),
        );
    }

    pub fn log_chapter_complete(&self, index: usize, title: &str, chunks: usize, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        self.info(
            &format!(
                "Completed chapter {}: {} ({} chunks in {:.1}s)",
                index + 1,
                title,
                chunks,
                secs
            ),
            Some(json!({
                "chapter_index": index,
                "chapter_name": title,
                "chunks_processed": chunks,
                "duration_seconds": secs,
            })),
        );
    }

    /// Logs an error at ERROR level with its kind, message, trace and site.
    pub fn log_error_with_context(
        &self,
        error: &(dyn StdError + 'static),
        kind: &str,
        context: &str,
        chapter: Option<usize>,
        chunk: Option<usize>,
    ) {
        let mut metadata = json!({
            "error_type": kind,
            "error_message": error.to_string(),
            "context": context,
            "traceback": render_trace(error),
        });
        if let Some(chapter) = chapter {
            metadata["chapter_index"] = json!(chapter);
        }
        if let Some(chunk) = chunk {
            metadata["chunk_index"] = json!(chunk);
        }

        self.error(
            &format!("Error during {}: {}: {}", context, kind, error),
            Some(metadata),
        );
    }

    pub fn recent_logs(&self, limit: u64) -> Result<Vec<LogEntry>, DatabaseError> {
        self.store.get_logs(&self.job_id, &[], Some(limit))
    }

    /// ERROR and CRITICAL entries, newest first.
    pub fn error_logs(&self) -> Result<Vec<LogEntry>, DatabaseError> {
        self.store
            .get_logs(&self.job_id, &[LogLevel::Error, LogLevel::Critical], None)
    }
}
