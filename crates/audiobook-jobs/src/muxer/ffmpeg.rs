//! Compressed output through an `ffmpeg` subprocess.
//!
//! The chapters are first written as a WAV next to the output, together
//! with an FFMETADATA file carrying tags and chapter markers. Both are
//! removed once ffmpeg returns.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::wav::write_wav;
use crate::engine::{AssemblyRequest, MediaMuxer};
use crate::error::BoxError;
use crate::jobs::{BookMetadata, OutputFormat};

#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    ffmpeg_path: String,
}

impl FfmpegMuxer {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    fn codec_args(format: OutputFormat) -> &'static [&'static str] {
        match format {
            OutputFormat::Mp3 => &["-c:a", "libmp3lame", "-q:a", "2"],
            OutputFormat::M4a => &["-c:a", "aac", "-b:a", "64k", "-movflags", "+faststart"],
            OutputFormat::Wav => &["-c:a", "pcm_s16le"],
        }
    }
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl MediaMuxer for FfmpegMuxer {
    fn assemble(&self, request: &AssemblyRequest<'_>) -> Result<(), BoxError> {
        let _span = tracing::info_span!(
            "muxer.ffmpeg",
            format = %request.format,
            chapters = request.chapters.len()
        )
        .entered();

        let staging = StagingFiles::next_to(request.output_path);
        write_wav(request, &staging.wav)?;
        fs::write(&staging.metadata, ffmetadata(request))
            .map_err(|e| format!("Failed to write {}: {}", staging.metadata.display(), e))?;

        let output = Command::new(&self.ffmpeg_path)
            .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
            .arg(&staging.wav)
            .arg("-i")
            .arg(&staging.metadata)
            .args(["-map", "0:a", "-map_metadata", "1", "-map_chapters", "1"])
            .args(Self::codec_args(request.format))
            .arg(request.output_path)
            .output()
            .map_err(|e| format!("Failed to start '{}': {}", self.ffmpeg_path, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("ffmpeg exited with {}: {}", output.status, stderr.trim()).into());
        }
        Ok(())
    }
}

/// Intermediate files, removed on drop.
struct StagingFiles {
    wav: PathBuf,
    metadata: PathBuf,
}

impl StagingFiles {
    fn next_to(output: &Path) -> Self {
        let mut wav = output.as_os_str().to_owned();
        wav.push(".staging.wav");
        let mut metadata = output.as_os_str().to_owned();
        metadata.push(".ffmeta");
        Self {
            wav: PathBuf::from(wav),
            metadata: PathBuf::from(metadata),
        }
    }
}

impl Drop for StagingFiles {
    fn drop(&mut self) {
        for path in [&self.wav, &self.metadata] {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove staging file");
                }
            }
        }
    }
}

/// Renders an FFMETADATA1 document: global tags, then one `[CHAPTER]`
/// per chapter with millisecond bounds.
pub(crate) fn ffmetadata(request: &AssemblyRequest<'_>) -> String {
    let mut out = String::from(";FFMETADATA1\n");

    if let Some(metadata) = request.metadata {
        for (key, value) in global_tags(metadata) {
            let _ = writeln!(out, "{}={}", key, escape(&value));
        }
    }

    let rate = u64::from(request.sample_rate.max(1));
    let mut start_samples = 0u64;
    for chapter in request.chapters {
        let end_samples = start_samples + chapter.samples.len() as u64;
        let _ = writeln!(out, "\n[CHAPTER]\nTIMEBASE=1/1000");
        let _ = writeln!(out, "START={}", start_samples * 1000 / rate);
        let _ = writeln!(out, "END={}", end_samples * 1000 / rate);
        let _ = writeln!(out, "title={}", escape(&chapter.title));
        start_samples = end_samples;
    }

    out
}

fn global_tags(metadata: &BookMetadata) -> Vec<(&'static str, String)> {
    let mut tags = Vec::new();
    if let Some(title) = &metadata.title {
        tags.push(("title", title.clone()));
        tags.push(("album", title.clone()));
    }
    if let Some(author) = &metadata.author {
        tags.push(("artist", author.clone()));
        tags.push(("album_artist", author.clone()));
        tags.push(("composer", author.clone()));
    }
    if let Some(date) = &metadata.publication_date {
        tags.push(("date", date.clone()));
    }
    if let Some(publisher) = &metadata.publisher {
        tags.push(("publisher", publisher.clone()));
    }
    if let Some(language) = &metadata.language {
        tags.push(("language", language.clone()));
    }
    if let Some(description) = &metadata.description {
        tags.push(("comment", description.clone()));
    }
    tags.push(("genre", "Audiobook".to_string()));
    tags
}

/// FFMETADATA reserves `=`, `;`, `#`, `\` and newlines.
fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '=' | ';' | '#' | '\\' | '\n') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ChapterAudio;

    #[test]
    fn test_escape() {
        assert_eq!(escape("a=b;c#d\\e"), "a\\=b\\;c\\#d\\\\e");
        assert_eq!(escape("two\nlines"), "two\\\nlines");
    }

    #[test]
    fn test_ffmetadata_chapters_and_tags() {
        let chapters = vec![
            ChapterAudio {
                title: "Intro".into(),
                samples: vec![0.0; 1000],
            },
            ChapterAudio {
                title: "Part 1; Dawn".into(),
                samples: vec![0.0; 2500],
            },
        ];
        let metadata = BookMetadata {
            title: Some("Deep Water".into()),
            author: Some("R. Fisher".into()),
            ..Default::default()
        };
        let request = AssemblyRequest {
            chapters: &chapters,
            sample_rate: 1000,
            output_path: Path::new("/tmp/book.m4a"),
            format: OutputFormat::M4a,
            metadata: Some(&metadata),
        };

        let rendered = ffmetadata(&request);
        assert!(rendered.starts_with(";FFMETADATA1\ntitle=Deep Water\n"));
        assert!(rendered.contains("artist=R. Fisher\n"));
        assert!(rendered.contains("genre=Audiobook\n"));
        assert!(rendered.contains("[CHAPTER]\nTIMEBASE=1/1000\nSTART=0\nEND=1000\ntitle=Intro\n"));
        assert!(rendered.contains("START=1000\nEND=3500\ntitle=Part 1\\; Dawn\n"));
    }

    #[test]
    fn test_staging_paths() {
        let staging = StagingFiles::next_to(Path::new("/out/book.mp3"));
        assert_eq!(staging.wav, PathBuf::from("/out/book.mp3.staging.wav"));
        assert_eq!(staging.metadata, PathBuf::from("/out/book.mp3.ffmeta"));
    }

    #[test]
    fn test_missing_binary_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("book.mp3");
        let chapters = vec![ChapterAudio {
            title: "One".into(),
            samples: vec![0.1; 10],
        }];
        let request = AssemblyRequest {
            chapters: &chapters,
            sample_rate: 24_000,
            output_path: &output,
            format: OutputFormat::Mp3,
            metadata: None,
        };

        let muxer = FfmpegMuxer::new("/nonexistent/ffmpeg-binary");
        let err = muxer.assemble(&request).unwrap_err();
        assert!(err.to_string().contains("Failed to start"));
        assert!(!dir.path().join("book.mp3.staging.wav").exists());
    }
}
