//! Typed per-job options, validated at submission time.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Languages the speech engine accepts.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "en-us", "en-gb", "ja", "zh", "ko", "es", "fr", "hi", "it", "pt-br",
];

pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 2.0;

const DEFAULT_BLEND_WEIGHT: f32 = 50.0;

/// Kind of input document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Text,
    Ebook,
    Pdf,
}

impl SourceKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" | "text" => Some(Self::Text),
            "epub" => Some(Self::Ebook),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Ebook => "ebook",
            Self::Pdf => "pdf",
        }
    }

    /// Ebooks and PDFs have chapters and metadata worth shaping.
    pub fn is_book(&self) -> bool {
        matches!(self, Self::Ebook | Self::Pdf)
    }
}

impl FromStr for SourceKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "ebook" => Ok(Self::Ebook),
            "pdf" => Ok(Self::Pdf),
            other => Err(QueueError::validation(format!(
                "Unknown source kind: {}",
                other
            ))),
        }
    }
}

/// Encoding of the final artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Wav,
    Mp3,
    #[default]
    M4a,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wav" => Ok(Self::Wav),
            "mp3" => Ok(Self::Mp3),
            "m4a" => Ok(Self::M4a),
            other => Err(QueueError::validation(format!(
                "Unsupported output format: {} (expected wav, mp3 or m4a)",
                other
            ))),
        }
    }
}

/// A voice with its share of a blend, in percent.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedVoice {
    pub name: String,
    pub weight: f32,
}

/// A single voice or a two-way weighted blend.
///
/// Stored as its textual form, `af_sarah` or `af_sarah:60,am_adam:40`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VoiceSpec {
    Single(String),
    Blend(WeightedVoice, WeightedVoice),
}

impl Default for VoiceSpec {
    fn default() -> Self {
        Self::Single("af_sarah".to_string())
    }
}

impl FromStr for VoiceSpec {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(QueueError::validation("Voice must not be empty"));
        }
        if !s.contains(',') {
            if s.contains(':') {
                return Err(QueueError::validation(format!(
                    "Weighted voice '{}' requires a second voice to blend with",
                    s
                )));
            }
            return Ok(Self::Single(s.to_string()));
        }

        let mut voices = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            let (name, weight) = match part.split_once(':') {
                Some((name, weight)) => {
                    let weight: f32 = weight.trim().parse().map_err(|_| {
                        QueueError::validation(format!("Invalid blend weight in '{}'", part))
                    })?;
                    (name.trim(), weight)
                }
                None => (part, DEFAULT_BLEND_WEIGHT),
            };
            if name.is_empty() {
                return Err(QueueError::validation(format!("Empty voice name in '{}'", s)));
            }
            if !(weight.is_finite() && weight > 0.0) {
                return Err(QueueError::validation(format!(
                    "Blend weight for '{}' must be positive",
                    name
                )));
            }
            voices.push(WeightedVoice {
                name: name.to_string(),
                weight,
            });
        }

        let [first, second]: [WeightedVoice; 2] = voices.try_into().map_err(|_| {
            QueueError::validation("Voice blending requires exactly two voices")
        })?;

        let total = first.weight + second.weight;
        let scale = 100.0 / total;
        Ok(Self::Blend(
            WeightedVoice {
                weight: first.weight * scale,
                ..first
            },
            WeightedVoice {
                weight: second.weight * scale,
                ..second
            },
        ))
    }
}

impl fmt::Display for VoiceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(name) => f.write_str(name),
            Self::Blend(a, b) => write!(f, "{}:{},{}:{}", a.name, a.weight, b.name, b.weight),
        }
    }
}

impl TryFrom<String> for VoiceSpec {
    type Error = QueueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VoiceSpec> for String {
    fn from(value: VoiceSpec) -> Self {
        value.to_string()
    }
}

/// Options interpreted by the speech engine adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    pub voice: VoiceSpec,
    pub speed: f32,
    pub lang: String,
    #[serde(default)]
    pub use_gpu: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            voice: VoiceSpec::default(),
            speed: 1.0,
            lang: "en-us".to_string(),
            use_gpu: false,
        }
    }
}

impl ProcessingOptions {
    pub fn validate(&self) -> Result<(), QueueError> {
        if !(MIN_SPEED..=MAX_SPEED).contains(&self.speed) {
            return Err(QueueError::validation(format!(
                "Speed {} is outside {}..={}",
                self.speed, MIN_SPEED, MAX_SPEED
            )));
        }
        if !SUPPORTED_LANGUAGES.contains(&self.lang.as_str()) {
            return Err(QueueError::validation(format!(
                "Unsupported language '{}'; supported: {}",
                self.lang,
                SUPPORTED_LANGUAGES.join(", ")
            )));
        }
        Ok(())
    }
}

/// How the introduction chapter is produced.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "text", rename_all = "lowercase")]
pub enum IntroPolicy {
    /// Generated from the book metadata when it names a title or author.
    #[default]
    Auto,
    Custom(String),
    Disabled,
}

/// Options interpreted by the extraction and assembly steps.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AudiobookOptions {
    /// Chapter selection expression such as `1,3,5-7` or `last`.
    #[serde(default)]
    pub select_chapters: Option<String>,
    #[serde(default)]
    pub skip_front_matter: bool,
    #[serde(default)]
    pub intro: IntroPolicy,
}

impl AudiobookOptions {
    pub fn validate(&self) -> Result<(), QueueError> {
        if let Some(expr) = &self.select_chapters {
            crate::extractor::selection::validate_expression(expr)?;
        }
        if let IntroPolicy::Custom(text) = &self.intro {
            if text.trim().is_empty() {
                return Err(QueueError::validation("Custom intro text must not be empty"));
            }
        }
        Ok(())
    }
}

/// Bibliographic metadata, extracted or supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BookMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub publisher: Option<String>,
    pub language: Option<String>,
    pub isbn: Option<String>,
    pub publication_date: Option<String>,
    pub description: Option<String>,
}

impl BookMetadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// `"Title by Author"`, whichever parts are known, or `"Unknown Book"`.
    pub fn display_name(&self) -> String {
        match (self.title.as_deref(), self.author.as_deref()) {
            (Some(title), Some(author)) => format!("{} by {}", title, author),
            (Some(title), None) => title.to_string(),
            (None, Some(author)) => format!("Book by {}", author),
            (None, None) => "Unknown Book".to_string(),
        }
    }
}
