//! Seams to the collaborators that do the actual content work.
//!
//! The queue only orchestrates: chapters come from a [`DocumentExtractor`],
//! audio from a [`SpeechEngine`] and the final artifact from a
//! [`MediaMuxer`].

pub mod command;

use std::path::Path;

use crate::error::BoxError;
use crate::jobs::{BookMetadata, OutputFormat, ProcessingOptions, SourceKind};

pub use command::CommandSpeechEngine;

/// A titled, ordered unit of source content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub title: String,
    pub content: String,
    pub order: usize,
}

impl Chapter {
    pub fn new(title: impl Into<String>, content: impl Into<String>, order: usize) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            order,
        }
    }

    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

/// Turns an input file into chapters.
pub trait DocumentExtractor: Send + Sync {
    /// Chapters in reading order.
    fn extract(&self, path: &Path, kind: SourceKind) -> Result<Vec<Chapter>, BoxError>;

    /// Best-effort bibliographic metadata. Callers treat failure as "unknown".
    fn read_metadata(&self, path: &Path, kind: SourceKind) -> Result<BookMetadata, BoxError>;
}

/// Mono audio produced for one chunk of text.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesized {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Produces audio for a bounded slice of text.
///
/// Implementations own any retry or subdivision of oversized input.
pub trait SpeechEngine: Send + Sync {
    fn synthesize(&self, text: &str, options: &ProcessingOptions) -> Result<Synthesized, BoxError>;
}

/// Samples of one chapter, in synthesis order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterAudio {
    pub title: String,
    pub samples: Vec<f32>,
}

/// Everything a muxer needs to write the final artifact.
#[derive(Debug)]
pub struct AssemblyRequest<'a> {
    pub chapters: &'a [ChapterAudio],
    pub sample_rate: u32,
    pub output_path: &'a Path,
    pub format: OutputFormat,
    pub metadata: Option<&'a BookMetadata>,
}

impl AssemblyRequest<'_> {
    pub fn total_samples(&self) -> usize {
        self.chapters.iter().map(|c| c.samples.len()).sum()
    }
}

/// Writes the final audio artifact.
pub trait MediaMuxer: Send + Sync {
    fn assemble(&self, request: &AssemblyRequest<'_>) -> Result<(), BoxError>;
}
