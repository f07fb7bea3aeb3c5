//! Built-in document extractors and post-extraction chapter shaping.

pub mod epub;
pub mod front_matter;
pub mod pdf;
pub mod selection;
pub mod text;

use std::path::Path;

use crate::engine::{Chapter, DocumentExtractor};
use crate::error::BoxError;
use crate::jobs::{AudiobookOptions, BookMetadata, IntroPolicy, SourceKind};

pub use front_matter::is_front_matter;
pub use selection::{parse_chapter_selection, SelectionError};

pub const INTRO_TITLE: &str = "Introduction";

/// Routes extraction by [`SourceKind`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractorRegistry;

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentExtractor for ExtractorRegistry {
    fn extract(&self, path: &Path, kind: SourceKind) -> Result<Vec<Chapter>, BoxError> {
        match kind {
            SourceKind::Text => text::extract_text(path),
            SourceKind::Ebook => epub::extract_epub(path),
            SourceKind::Pdf => pdf::extract_pdf(path),
        }
    }

    fn read_metadata(&self, path: &Path, kind: SourceKind) -> Result<BookMetadata, BoxError> {
        match kind {
            SourceKind::Text => Ok(BookMetadata::default()),
            SourceKind::Ebook => epub::epub_metadata(path),
            SourceKind::Pdf => pdf::pdf_metadata(path),
        }
    }
}

/// Applies front-matter skipping, chapter selection and the introduction
/// policy, in that order, then renumbers chapters from 1.
///
/// Selection numbers refer to the chapters left after front matter is
/// removed.
pub fn shape_chapters(
    chapters: Vec<Chapter>,
    options: &AudiobookOptions,
    metadata: Option<&BookMetadata>,
) -> Result<Vec<Chapter>, SelectionError> {
    let mut chapters = chapters;

    if options.skip_front_matter {
        let (front, body): (Vec<Chapter>, Vec<Chapter>) = chapters
            .into_iter()
            .partition(|c| is_front_matter(&c.title, c.order, c.word_count()));
        if body.is_empty() {
            tracing::warn!(
                skipped = front.len(),
                "every chapter looks like front matter, keeping all of them"
            );
            chapters = front;
        } else {
            if !front.is_empty() {
                let titles: Vec<&str> = front.iter().map(|c| c.title.as_str()).collect();
                tracing::debug!(?titles, "skipping front matter");
            }
            chapters = body;
        }
    }

    if let Some(expr) = options.select_chapters.as_deref() {
        let indices = parse_chapter_selection(expr, chapters.len())?;
        let mut slots: Vec<Option<Chapter>> = chapters.into_iter().map(Some).collect();
        chapters = indices.iter().filter_map(|&i| slots[i].take()).collect();
    }

    let intro = match &options.intro {
        IntroPolicy::Auto => metadata.and_then(intro_text),
        IntroPolicy::Custom(text) => Some(text.clone()),
        IntroPolicy::Disabled => None,
    };
    if let Some(intro) = intro {
        chapters.insert(0, Chapter::new(INTRO_TITLE, intro, 0));
    }

    for (i, chapter) in chapters.iter_mut().enumerate() {
        chapter.order = i + 1;
    }
    Ok(chapters)
}

/// Spoken introduction generated from book metadata.
pub fn intro_text(metadata: &BookMetadata) -> Option<String> {
    let title = metadata.title.as_deref()?;
    Some(match metadata.author.as_deref() {
        Some(author) => format!(
            "This is {}, written by {}, narrated by text-to-speech.",
            title, author
        ),
        None => format!("This is {}, narrated by text-to-speech.", title),
    })
}
