use std::error::Error as StdError;
use std::fmt::Write as _;
use std::path::PathBuf;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::jobs::ErrorInfo;

/// Boxed error returned by external collaborators (extractor, speech
/// engine, muxer).
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Errors surfaced by the control-plane API.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Bad caller input. Raised before anything is persisted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transient persistence failure; the caller should retry.
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl QueueError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("No home directory available to derive '{0}'")]
    NoHomeDirectory(&'static str),
}

/// Failure of a single job execution attempt.
///
/// Everything except [`JobError::Storage`] ends with the job marked
/// `failed` and an [`ErrorInfo`] built by [`JobError::to_error_info`].
#[derive(Error, Debug)]
pub enum JobError {
    #[error("{0}")]
    Validation(String),

    #[error("Failed to extract chapters from '{path}': {source}")]
    Extraction {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("Speech synthesis failed at chapter {chapter}, chunk {chunk}: {source}")]
    Synthesis {
        chapter: usize,
        chunk: usize,
        #[source]
        source: BoxError,
    },

    #[error("Failed to assemble output '{path}': {source}")]
    Assembly {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("Checkpoint spool I/O failed for '{path}': {source}")]
    Spool {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl JobError {
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Validation(_) => "ValidationError",
            JobError::Extraction { .. } => "ExtractionError",
            JobError::Synthesis { .. } => "SynthesisError",
            JobError::Assembly { .. } => "AssemblyError",
            JobError::Spool { .. } => "SpoolError",
            JobError::Storage(_) => "StorageError",
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, JobError::Validation(_))
    }

    pub fn recovery_hint(&self) -> &'static str {
        match self {
            JobError::Validation(_) => {
                "Fix the input document or job options and submit a new job."
            }
            JobError::Extraction { .. } => {
                "Check that the input file is readable and not corrupted, then resume the job."
            }
            JobError::Synthesis { .. } => {
                "Resume the job; completed chapters are skipped. Very long passages may need splitting."
            }
            JobError::Assembly { .. } => {
                "All chapters are synthesized. Check the ffmpeg installation and output path, then resume to re-run assembly."
            }
            JobError::Spool { .. } => {
                "Check free disk space and permissions on the spool directory, then resume the job."
            }
            JobError::Storage(_) => "The job will be requeued automatically once storage is reachable.",
        }
    }

    /// The operation that was running when the error occurred.
    pub fn operation(&self) -> &'static str {
        match self {
            JobError::Validation(_) => "validate",
            JobError::Extraction { .. } => "extract",
            JobError::Synthesis { .. } => "synthesize",
            JobError::Assembly { .. } => "assemble",
            JobError::Spool { .. } => "checkpoint",
            JobError::Storage(_) => "persist",
        }
    }

    fn site(&self) -> (Option<usize>, Option<usize>) {
        match self {
            JobError::Synthesis { chapter, chunk, .. } => (Some(*chapter), Some(*chunk)),
            _ => (None, None),
        }
    }

    /// Builds the persisted diagnostic for this error.
    ///
    /// `chapter` fills in the failure site when the error itself does not
    /// carry one.
    pub fn to_error_info(&self, chapter: Option<usize>) -> ErrorInfo {
        let (err_chapter, chunk) = self.site();
        let info = ErrorInfo::new(self.kind(), self.to_string())
            .with_site(err_chapter.or(chapter), chunk)
            .with_operation(self.operation())
            .with_trace(render_trace(self));

        if self.is_recoverable() {
            info.recoverable(self.recovery_hint())
        } else {
            ErrorInfo {
                recovery_hint: Some(self.recovery_hint().to_string()),
                ..info
            }
        }
    }
}

/// Renders the `source()` chain, followed by a backtrace when
/// `RUST_BACKTRACE` enables capture.
pub fn render_trace(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = write!(out, "\ncaused by: {}", cause);
        source = cause.source();
    }

    let backtrace = std::backtrace::Backtrace::capture();
    if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
        let _ = write!(out, "\n\n{}", backtrace);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_not_recoverable() {
        let err = JobError::Validation("no chapters".into());
        let info = err.to_error_info(None);
        assert_eq!(info.kind, "ValidationError");
        assert!(!info.is_recoverable);
        assert!(info.recovery_hint.is_some());
    }

    #[test]
    fn test_synthesis_carries_site() {
        let err = JobError::Synthesis {
            chapter: 2,
            chunk: 5,
            source: "engine crashed".into(),
        };
        let info = err.to_error_info(Some(9));
        assert_eq!(info.kind, "SynthesisError");
        assert_eq!(info.chapter_index, Some(2));
        assert_eq!(info.chunk_index, Some(5));
        assert_eq!(info.operation.as_deref(), Some("synthesize"));
        assert!(info.is_recoverable);
        assert!(info.trace.contains("engine crashed"));
    }

    #[test]
    fn test_assembly_falls_back_to_given_chapter() {
        let err = JobError::Assembly {
            path: PathBuf::from("/tmp/out.mp3"),
            source: "ffmpeg exited with status 1".into(),
        };
        let info = err.to_error_info(Some(4));
        assert_eq!(info.chapter_index, Some(4));
        assert_eq!(info.chunk_index, None);
        assert!(info.is_recoverable);
    }

    #[test]
    fn test_trace_includes_cause_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = JobError::Spool {
            path: PathBuf::from("/spool/c0_0.wav"),
            source: io,
        };
        let trace = render_trace(&err);
        assert!(trace.starts_with("Checkpoint spool I/O failed"));
        assert!(trace.contains("caused by: disk full"));
    }
}
