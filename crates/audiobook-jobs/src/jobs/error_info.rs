use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Diagnostic snapshot stored on a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Short machine-readable kind, e.g. `SynthesisError`.
    pub kind: String,
    pub message: String,
    /// Rendered error chain, plus a backtrace when one was captured.
    pub trace: String,
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub chapter_index: Option<usize>,
    #[serde(default)]
    pub chunk_index: Option<usize>,
    #[serde(default)]
    pub operation: Option<String>,

    pub is_recoverable: bool,
    #[serde(default)]
    pub recovery_hint: Option<String>,
}

impl ErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: String::new(),
            timestamp: Utc::now(),
            chapter_index: None,
            chunk_index: None,
            operation: None,
            is_recoverable: false,
            recovery_hint: None,
        }
    }

    pub fn recoverable(mut self, hint: impl Into<String>) -> Self {
        self.is_recoverable = true;
        self.recovery_hint = Some(hint.into());
        self
    }

    pub fn with_site(mut self, chapter: Option<usize>, chunk: Option<usize>) -> Self {
        self.chapter_index = chapter;
        self.chunk_index = chunk;
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = trace.into();
        self
    }
}
