pub mod ffmpeg;
pub mod wav;

use crate::engine::{AssemblyRequest, MediaMuxer};
use crate::error::BoxError;
use crate::jobs::OutputFormat;

pub use ffmpeg::FfmpegMuxer;
pub use wav::WavMuxer;

/// WAV natively, everything else through ffmpeg.
#[derive(Debug, Clone, Default)]
pub struct DefaultMuxer {
    wav: WavMuxer,
    ffmpeg: FfmpegMuxer,
}

impl DefaultMuxer {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            wav: WavMuxer::new(),
            ffmpeg: FfmpegMuxer::new(ffmpeg_path),
        }
    }
}

impl MediaMuxer for DefaultMuxer {
    fn assemble(&self, request: &AssemblyRequest<'_>) -> Result<(), BoxError> {
        match request.format {
            OutputFormat::Wav => self.wav.assemble(request),
            OutputFormat::Mp3 | OutputFormat::M4a => self.ffmpeg.assemble(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ChapterAudio;
    use tempfile::TempDir;

    #[test]
    fn test_wav_does_not_need_ffmpeg() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("book.wav");
        let chapters = vec![ChapterAudio {
            title: "One".into(),
            samples: vec![0.25; 32],
        }];
        let request = AssemblyRequest {
            chapters: &chapters,
            sample_rate: 16_000,
            output_path: &output,
            format: OutputFormat::Wav,
            metadata: None,
        };

        DefaultMuxer::new("/nonexistent/ffmpeg").assemble(&request).unwrap();
        assert!(output.metadata().unwrap().len() > 44);
    }
}
