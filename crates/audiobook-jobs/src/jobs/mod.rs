//! Typed job records and the value types stored on them.

mod error_info;
mod model;
mod options;
mod progress;
mod resume;
mod status;

pub use error_info::ErrorInfo;
pub use model::{InputDescriptor, Job, OutputDescriptor};
pub use options::{
    AudiobookOptions, BookMetadata, IntroPolicy, OutputFormat, ProcessingOptions, SourceKind,
    VoiceSpec, WeightedVoice, MAX_SPEED, MIN_SPEED, SUPPORTED_LANGUAGES,
};
pub use progress::JobProgress;
pub use resume::ResumeData;
pub use status::{JobStatus, UnknownStatus};
