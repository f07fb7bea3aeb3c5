pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod extractor;
pub mod jobs;
pub mod logger;
pub mod manager;
pub mod muxer;
pub mod store;
pub mod worker;

pub use config::{load_config, QueueConfig};
pub use db::DatabaseError;
pub use engine::{
    AssemblyRequest, Chapter, ChapterAudio, DocumentExtractor, MediaMuxer, SpeechEngine,
    Synthesized,
};
pub use error::{BoxError, ConfigError, JobError, QueueError};
pub use events::{JobEvent, JobEventBroadcaster, JobEventKind};
pub use jobs::{
    AudiobookOptions, BookMetadata, ErrorInfo, IntroPolicy, Job, JobProgress, JobStatus,
    OutputFormat, ProcessingOptions, ResumeData, SourceKind, VoiceSpec,
};
pub use logger::{JobLogger, LogEntry, LogLevel};
pub use manager::{JobManager, SubmitRequest};
pub use store::{FileKind, JobStore, Statistics, WorkerHeartbeat};
pub use worker::{CancelToken, Outcome, Worker, WorkerSettings};
