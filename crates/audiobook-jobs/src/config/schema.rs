use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::default_data_dir;
use crate::error::ConfigError;

/// Runtime configuration for the queue and its workers.
///
/// Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Defaults to `~/.audiobook-jobs/jobs.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Defaults to `~/.audiobook-jobs/spool`.
    #[serde(default)]
    pub spool_directory: Option<PathBuf>,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub muxer: MuxerConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            spool_directory: None,
            worker: WorkerConfig::default(),
            speech: SpeechConfig::default(),
            muxer: MuxerConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl QueueConfig {
    pub fn resolved_database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => default_data_dir()
                .map(|d| d.join("jobs.db"))
                .ok_or(ConfigError::NoHomeDirectory("database_path")),
        }
    }

    pub fn resolved_spool_directory(&self) -> Result<PathBuf, ConfigError> {
        match &self.spool_directory {
            Some(path) => Ok(path.clone()),
            None => default_data_dir()
                .map(|d| d.join("spool"))
                .ok_or(ConfigError::NoHomeDirectory("spool_directory")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: f64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Target characters per Speech Engine call.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Defaults to `worker-<pid>`.
    #[serde(default)]
    pub worker_id: Option<String>,
}

fn default_poll_interval() -> f64 {
    2.0
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_chunk_size() -> usize {
    1000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            chunk_size: default_chunk_size(),
            worker_id: None,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn resolved_worker_id(&self) -> String {
        self.worker_id
            .clone()
            .unwrap_or_else(|| format!("worker-{}", std::process::id()))
    }
}

/// External TTS program used by the command speech engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechConfig {
    #[serde(default = "default_speech_program")]
    pub program: String,
    #[serde(default = "default_speech_args")]
    pub args: Vec<String>,
}

fn default_speech_program() -> String {
    "kokoro-tts".to_string()
}

fn default_speech_args() -> Vec<String> {
    [
        "-", "-", "--stdout", "--voice", "{voice}", "--speed", "{speed}", "--lang", "{lang}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            program: default_speech_program(),
            args: default_speech_args(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuxerConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}
