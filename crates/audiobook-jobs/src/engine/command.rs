//! Speech engine that shells out to an external TTS program per chunk.

use std::io::{Cursor, Write};
use std::process::{Command, Stdio};

use hound::{SampleFormat, WavReader};

use super::{SpeechEngine, Synthesized};
use crate::error::BoxError;
use crate::jobs::ProcessingOptions;

/// Runs `program args...` once per chunk.
///
/// The chunk text is written to stdin and a WAV stream is read from stdout.
/// `{voice}`, `{speed}`, `{lang}` and `{gpu}` in the arguments are replaced
/// with the job's processing options.
#[derive(Debug, Clone)]
pub struct CommandSpeechEngine {
    program: String,
    args: Vec<String>,
}

impl CommandSpeechEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn render_args(&self, options: &ProcessingOptions) -> Vec<String> {
        let voice = options.voice.to_string();
        let speed = options.speed.to_string();
        let gpu = options.use_gpu.to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{voice}", &voice)
                    .replace("{speed}", &speed)
                    .replace("{lang}", &options.lang)
                    .replace("{gpu}", &gpu)
            })
            .collect()
    }
}

impl SpeechEngine for CommandSpeechEngine {
    fn synthesize(&self, text: &str, options: &ProcessingOptions) -> Result<Synthesized, BoxError> {
        let _span = tracing::debug_span!("engine.command", program = %self.program, chars = text.len())
            .entered();

        let mut child = Command::new(&self.program)
            .args(self.render_args(options))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("Failed to start '{}': {}", self.program, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes())?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )
            .into());
        }

        decode_wav(&output.stdout)
    }
}

/// Decodes a mono or interleaved WAV buffer into mono f32 samples.
pub(crate) fn decode_wav(bytes: &[u8]) -> Result<Synthesized, BoxError> {
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let channels = usize::from(spec.channels.max(1));
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(Synthesized {
        samples,
        sample_rate: spec.sample_rate,
    })
}
