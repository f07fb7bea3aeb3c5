use std::path::Path;

use crate::config::schema::QueueConfig;
use crate::error::ConfigError;

/// Smallest chunk size that still leaves room for a full sentence.
const MIN_CHUNK_SIZE: usize = 100;

/// Loads a JSON config file. A missing file yields the defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<QueueConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        log::info!("No config at {}, using defaults", path.display());
        let config = QueueConfig::default();
        validate_config(&config)?;
        return Ok(config);
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<QueueConfig, ConfigError> {
    let config: QueueConfig = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &QueueConfig) -> Result<(), ConfigError> {
    let worker = &config.worker;

    if !(worker.poll_interval_secs.is_finite() && worker.poll_interval_secs > 0.0) {
        return Err(ConfigError::Validation {
            message: format!(
                "worker.poll_interval_secs must be positive, got {}",
                worker.poll_interval_secs
            ),
        });
    }

    if worker.heartbeat_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "worker.heartbeat_interval_secs must be positive".to_string(),
        });
    }

    if worker.chunk_size < MIN_CHUNK_SIZE {
        return Err(ConfigError::Validation {
            message: format!(
                "worker.chunk_size must be at least {}, got {}",
                MIN_CHUNK_SIZE, worker.chunk_size
            ),
        });
    }

    if let Some(id) = &worker.worker_id {
        if id.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "worker.worker_id must not be empty".to_string(),
            });
        }
    }

    if config.speech.program.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "speech.program must not be empty".to_string(),
        });
    }

    if config.log_level.parse::<tracing::Level>().is_err() {
        return Err(ConfigError::Validation {
            message: format!("Unknown log_level: {}", config.log_level),
        });
    }

    Ok(())
}
