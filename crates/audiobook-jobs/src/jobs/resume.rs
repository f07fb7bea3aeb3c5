//! Checkpoint of work that has already been durably produced.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which chapters and chunks already have their audio on disk.
///
/// Markers are only ever added after the corresponding output has been
/// written, never ahead of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeData {
    #[serde(default)]
    completed_chapters: BTreeSet<usize>,
    /// Chunks completed inside chapters that are not yet complete.
    #[serde(default)]
    completed_chunks: BTreeMap<usize, BTreeSet<usize>>,
    #[serde(default)]
    pub partial_audio_path: Option<PathBuf>,
    pub checkpoint_at: DateTime<Utc>,
}

impl Default for ResumeData {
    fn default() -> Self {
        Self::new()
    }
}

impl ResumeData {
    pub fn new() -> Self {
        Self {
            completed_chapters: BTreeSet::new(),
            completed_chunks: BTreeMap::new(),
            partial_audio_path: None,
            checkpoint_at: Utc::now(),
        }
    }

    pub fn is_chapter_completed(&self, chapter: usize) -> bool {
        self.completed_chapters.contains(&chapter)
    }

    pub fn is_chunk_completed(&self, chapter: usize, chunk: usize) -> bool {
        self.is_chapter_completed(chapter)
            || self
                .completed_chunks
                .get(&chapter)
                .is_some_and(|chunks| chunks.contains(&chunk))
    }

    pub fn mark_chunk_completed(&mut self, chapter: usize, chunk: usize) {
        if self.is_chapter_completed(chapter) {
            return;
        }
        self.completed_chunks.entry(chapter).or_default().insert(chunk);
        self.checkpoint_at = Utc::now();
    }

    /// Marks a chapter as done and drops its per-chunk markers.
    pub fn mark_chapter_completed(&mut self, chapter: usize) {
        self.completed_chapters.insert(chapter);
        self.completed_chunks.remove(&chapter);
        self.partial_audio_path = None;
        self.checkpoint_at = Utc::now();
    }

    /// Removes a chapter marker, e.g. because its audio went missing.
    pub fn forget_chapter(&mut self, chapter: usize) {
        self.completed_chapters.remove(&chapter);
        self.completed_chunks.remove(&chapter);
    }

    pub fn forget_chunk(&mut self, chapter: usize, chunk: usize) {
        if let Some(chunks) = self.completed_chunks.get_mut(&chapter) {
            chunks.remove(&chunk);
            if chunks.is_empty() {
                self.completed_chunks.remove(&chapter);
            }
        }
    }

    /// Drops markers that point past the last chapter.
    ///
    /// Returns the indices that were removed.
    pub fn retain_chapters_below(&mut self, chapter_count: usize) -> Vec<usize> {
        let stale: Vec<usize> = self
            .completed_chapters
            .iter()
            .chain(self.completed_chunks.keys())
            .copied()
            .filter(|&idx| idx >= chapter_count)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        for idx in &stale {
            self.forget_chapter(*idx);
        }
        stale
    }

    /// Completed chapter indices in ascending order.
    pub fn completed_chapters(&self) -> Vec<usize> {
        self.completed_chapters.iter().copied().collect()
    }

    /// Completed chunk indices of a chapter that is still in progress.
    pub fn partial_chunks(&self, chapter: usize) -> Vec<usize> {
        self.completed_chunks
            .get(&chapter)
            .map(|chunks| chunks.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Chapters with at least one completed chunk but no chapter marker.
    pub fn partial_chapters(&self) -> Vec<usize> {
        self.completed_chunks.keys().copied().collect()
    }

    /// Number of chunks recorded inside partially completed chapters.
    pub fn completed_chunk_count(&self) -> usize {
        self.completed_chunks.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.completed_chapters.is_empty() && self.completed_chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chapter_completion_absorbs_chunks() {
        let mut resume = ResumeData::new();
        resume.mark_chunk_completed(0, 0);
        resume.mark_chunk_completed(0, 1);
        assert_eq!(resume.completed_chunk_count(), 2);

        resume.mark_chapter_completed(0);
        assert_eq!(resume.completed_chunk_count(), 0);
        assert!(resume.is_chunk_completed(0, 7));
        assert_eq!(resume.completed_chapters(), vec![0]);
    }

    #[test]
    fn test_mid_chapter_markers() {
        let mut resume = ResumeData::new();
        resume.mark_chapter_completed(0);
        resume.mark_chunk_completed(1, 0);
        resume.mark_chunk_completed(1, 2);

        assert!(resume.is_chunk_completed(1, 0));
        assert!(!resume.is_chunk_completed(1, 1));
        assert_eq!(resume.partial_chunks(1), vec![0, 2]);
        assert_eq!(resume.partial_chapters(), vec![1]);
    }

    #[test]
    fn test_forget_chunk_clears_empty_chapter() {
        let mut resume = ResumeData::new();
        resume.mark_chunk_completed(2, 0);
        resume.forget_chunk(2, 0);
        assert!(resume.is_empty());
    }

    #[test]
    fn test_retain_chapters_below() {
        let mut resume = ResumeData::new();
        resume.mark_chapter_completed(0);
        resume.mark_chapter_completed(4);
        resume.mark_chunk_completed(6, 1);

        let removed = resume.retain_chapters_below(3);
        assert_eq!(removed, vec![4, 6]);
        assert_eq!(resume.completed_chapters(), vec![0]);
        assert_eq!(resume.completed_chunk_count(), 0);
    }

    #[test]
    fn test_json_keeps_integer_keys() {
        let mut resume = ResumeData::new();
        resume.mark_chapter_completed(1);
        resume.mark_chunk_completed(3, 4);

        let json = serde_json::to_string(&resume).unwrap();
        let back: ResumeData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resume);
    }
}
