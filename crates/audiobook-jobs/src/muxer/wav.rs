use std::fs;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::engine::{AssemblyRequest, MediaMuxer};
use crate::error::BoxError;

/// Writes 16-bit mono PCM WAV.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavMuxer;

impl WavMuxer {
    pub fn new() -> Self {
        Self
    }
}

impl MediaMuxer for WavMuxer {
    fn assemble(&self, request: &AssemblyRequest<'_>) -> Result<(), BoxError> {
        write_wav(request, request.output_path)
    }
}

/// Concatenates every chapter of `request` into a WAV file at `path`.
pub(crate) fn write_wav(request: &AssemblyRequest<'_>, path: &Path) -> Result<(), BoxError> {
    if request.total_samples() == 0 {
        return Err("No audio to assemble".into());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate: request.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)
        .map_err(|e| format!("Failed to create {}: {}", path.display(), e))?;
    for chapter in request.chapters {
        for &sample in &chapter.samples {
            writer.write_sample(to_pcm16(sample))?;
        }
    }
    writer.finalize()?;
    Ok(())
}

fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ChapterAudio;
    use crate::jobs::OutputFormat;
    use hound::WavReader;
    use tempfile::TempDir;

    #[test]
    fn test_writes_all_chapters_in_order() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("nested/book.wav");
        let chapters = vec![
            ChapterAudio {
                title: "One".into(),
                samples: vec![0.0, 1.0],
            },
            ChapterAudio {
                title: "Two".into(),
                samples: vec![-1.0, 2.0, 0.5],
            },
        ];
        let request = AssemblyRequest {
            chapters: &chapters,
            sample_rate: 24_000,
            output_path: &output,
            format: OutputFormat::Wav,
            metadata: None,
        };

        WavMuxer::new().assemble(&request).unwrap();

        let mut reader = WavReader::open(&output).unwrap();
        assert_eq!(reader.spec().sample_rate, 24_000);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, i16::MAX, -i16::MAX, i16::MAX, i16::MAX / 2]);
    }

    #[test]
    fn test_empty_audio_is_rejected() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("book.wav");
        let request = AssemblyRequest {
            chapters: &[],
            sample_rate: 24_000,
            output_path: &output,
            format: OutputFormat::Wav,
            metadata: None,
        };
        assert!(WavMuxer::new().assemble(&request).is_err());
        assert!(!output.exists());
    }
}
