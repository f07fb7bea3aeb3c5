use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    AudiobookOptions, BookMetadata, ErrorInfo, JobProgress, JobStatus, OutputFormat,
    ProcessingOptions, ResumeData, SourceKind,
};

/// Source document of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDescriptor {
    pub path: PathBuf,
    pub kind: SourceKind,
    pub size: u64,
}

/// Destination artifact of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDescriptor {
    pub path: PathBuf,
    pub format: OutputFormat,
    /// Set once the artifact has been written.
    pub size: Option<u64>,
}

/// One durable unit of conversion work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub input: InputDescriptor,
    pub output: OutputDescriptor,

    pub processing_options: ProcessingOptions,
    pub audiobook_options: Option<AudiobookOptions>,

    pub progress: JobProgress,
    pub metadata: Option<BookMetadata>,
    pub error_info: Option<ErrorInfo>,
    pub resume_data: Option<ResumeData>,

    pub processing_time_seconds: Option<f64>,
    /// Worker that most recently claimed the job.
    pub claimed_by: Option<String>,
}

impl Job {
    /// Builds a fresh `queued` job with a new id.
    pub fn new(input: InputDescriptor, output: OutputDescriptor) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            input,
            output,
            processing_options: ProcessingOptions::default(),
            audiobook_options: None,
            progress: JobProgress::default(),
            metadata: None,
            error_info: None,
            resume_data: None,
            processing_time_seconds: None,
            claimed_by: None,
        }
    }

    /// Wall-clock time since the job started, up to completion if finished.
    pub fn elapsed(&self) -> Option<Duration> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - started).to_std().ok()
    }

    /// A failed job can be resumed only if its error is recoverable and
    /// there is a checkpoint to resume from.
    pub fn can_be_resumed(&self) -> bool {
        self.status == JobStatus::Failed
            && self.resume_data.is_some()
            && self.error_info.as_ref().is_some_and(|e| e.is_recoverable)
    }

    pub fn can_be_cancelled(&self) -> bool {
        self.status.is_active()
    }

    /// One-line summary for list views.
    pub fn status_message(&self) -> String {
        match self.status {
            JobStatus::Queued => "Waiting in queue...".to_string(),
            JobStatus::Running => match &self.progress.current_operation {
                Some(op) => format!("{} ({:.1}%)", op, self.progress.percentage),
                None => format!("Processing... ({:.1}%)", self.progress.percentage),
            },
            JobStatus::Paused => "Paused".to_string(),
            JobStatus::Completed => "Completed successfully".to_string(),
            JobStatus::Failed => match &self.error_info {
                Some(info) => format!("Failed: {}", info.message),
                None => "Failed".to_string(),
            },
            JobStatus::Cancelled => "Cancelled by user".to_string(),
        }
    }

    /// `completed/total` chapters already banked, for resume decisions.
    pub fn banked_work(&self) -> (usize, u32) {
        let done = self
            .resume_data
            .as_ref()
            .map(|r| r.completed_chapters().len())
            .unwrap_or(0);
        (done, self.progress.total_chapters)
    }
}
