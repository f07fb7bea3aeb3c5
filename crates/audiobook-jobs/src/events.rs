//! Job event broadcaster for real-time status streaming within one process.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::jobs::{JobProgress, JobStatus};

/// What happened to a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Claimed,
    ChapterStarted,
    Progress,
    Completed,
    Failed,
    Cancelled,
    Requeued,
}

impl std::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobEventKind::Claimed => write!(f, "Claimed"),
            JobEventKind::ChapterStarted => write!(f, "Chapter started"),
            JobEventKind::Progress => write!(f, "Progress"),
            JobEventKind::Completed => write!(f, "Completed"),
            JobEventKind::Failed => write!(f, "Failed"),
            JobEventKind::Cancelled => write!(f, "Cancelled"),
            JobEventKind::Requeued => write!(f, "Requeued"),
        }
    }
}

/// A job event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    pub kind: JobEventKind,
    /// Status the job is in after this event.
    pub status: JobStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub percentage: f64,
    pub completed_chunks: u64,
    pub total_chunks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
    /// Output path (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobEvent {
    pub fn new(job_id: &str, kind: JobEventKind, status: JobStatus, message: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind,
            status,
            message: message.to_string(),
            timestamp: Utc::now(),
            percentage: 0.0,
            completed_chunks: 0,
            total_chunks: 0,
            eta_seconds: None,
            output_path: None,
            error: None,
        }
    }

    fn with_progress(mut self, progress: &JobProgress) -> Self {
        self.percentage = progress.percentage;
        self.completed_chunks = progress.completed_chunks;
        self.total_chunks = progress.total_chunks;
        self.eta_seconds = progress.eta_seconds;
        self
    }
}

/// Broadcasts job events to any number of in-process subscribers.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventBroadcaster {
    /// Creates a broadcaster with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Returns a tracker for one job.
    pub fn track(&self, job_id: &str) -> JobEventTracker {
        JobEventTracker {
            job_id: job_id.to_string(),
            sender: Arc::clone(&self.sender),
        }
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Emits events for a single job.
pub struct JobEventTracker {
    job_id: String,
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventTracker {
    fn emit(&self, event: JobEvent) {
        let _ = self.sender.send(event);
    }

    pub fn claimed(&self, worker_id: &str) {
        self.emit(JobEvent::new(
            &self.job_id,
            JobEventKind::Claimed,
            JobStatus::Running,
            &format!("Claimed by {}", worker_id),
        ));
    }

    pub fn chapter_started(&self, title: &str, progress: &JobProgress) {
        self.emit(
            JobEvent::new(
                &self.job_id,
                JobEventKind::ChapterStarted,
                JobStatus::Running,
                title,
            )
            .with_progress(progress),
        );
    }

    pub fn progress(&self, progress: &JobProgress) {
        let message = progress
            .current_operation
            .clone()
            .unwrap_or_else(|| "Processing".to_string());
        self.emit(
            JobEvent::new(&self.job_id, JobEventKind::Progress, JobStatus::Running, &message)
                .with_progress(progress),
        );
    }

    pub fn completed(&self, output_path: &str, progress: &JobProgress) {
        let mut event = JobEvent::new(
            &self.job_id,
            JobEventKind::Completed,
            JobStatus::Completed,
            "Audiobook created successfully",
        )
        .with_progress(progress);
        event.output_path = Some(output_path.to_string());
        self.emit(event);
    }

    pub fn failed(&self, error: &str, progress: &JobProgress) {
        let mut event = JobEvent::new(
            &self.job_id,
            JobEventKind::Failed,
            JobStatus::Failed,
            "Processing failed",
        )
        .with_progress(progress);
        event.error = Some(error.to_string());
        self.emit(event);
    }

    pub fn cancelled(&self, progress: &JobProgress) {
        self.emit(
            JobEvent::new(
                &self.job_id,
                JobEventKind::Cancelled,
                JobStatus::Cancelled,
                "Cancelled by user",
            )
            .with_progress(progress),
        );
    }

    pub fn requeued(&self, reason: &str) {
        self.emit(JobEvent::new(
            &self.job_id,
            JobEventKind::Requeued,
            JobStatus::Queued,
            reason,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_subscribers() {
        let broadcaster = JobEventBroadcaster::new(4);
        broadcaster.send(JobEvent::new("j", JobEventKind::Progress, JobStatus::Running, "x"));
    }

    #[test]
    fn test_tracker_lifecycle() {
        let broadcaster = JobEventBroadcaster::default();
        let mut rx = broadcaster.subscribe();
        let tracker = broadcaster.track("job-1");

        tracker.claimed("worker-7");
        let received = rx.try_recv().unwrap();
        assert_eq!(received.kind, JobEventKind::Claimed);
        assert_eq!(received.message, "Claimed by worker-7");

        let progress = JobProgress {
            total_chunks: 4,
            completed_chunks: 2,
            percentage: 50.0,
            current_operation: Some("Synthesizing chapter 1".to_string()),
            ..Default::default()
        };
        tracker.progress(&progress);
        let received = rx.try_recv().unwrap();
        assert_eq!(received.percentage, 50.0);
        assert_eq!(received.message, "Synthesizing chapter 1");

        tracker.completed("/out/book.m4a", &progress);
        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, JobStatus::Completed);
        assert_eq!(received.output_path.as_deref(), Some("/out/book.m4a"));
    }

    #[test]
    fn test_failure_event_carries_error() {
        let broadcaster = JobEventBroadcaster::new(4);
        let mut rx = broadcaster.subscribe();
        broadcaster
            .track("job-2")
            .failed("engine crashed", &JobProgress::default());

        let received = rx.try_recv().unwrap();
        assert_eq!(received.kind, JobEventKind::Failed);
        assert_eq!(received.error.as_deref(), Some("engine crashed"));
    }
}
