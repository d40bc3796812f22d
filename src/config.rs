//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (`config.toml`)
//! - Environment variables (with `APP_` prefix, `__` between levels)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (`APP_SESSION__MAX_CONTEXT_TOKENS=256`, ...)
//! 2. Configuration file (`config.toml`)
//! 3. Default values (defined in the Default impl)
//!
//! `HOST` and `PORT` are also honoured because most deployment platforms set
//! them without a prefix.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub audio: AudioConfig,
    pub transcription: TranscriptionConfig,
    pub training: TrainingConfig,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Scam classifier configuration.
///
/// ## Fields:
/// - `classifier_backend`: `"distilbert"` loads the fine-tuned sequence
///   classifier, `"lexicon"` uses the keyword heuristic (no model download)
/// - `classifier_model_dir`: local directory holding `config.json`,
///   `tokenizer.json` and `model.safetensors`
/// - `classifier_repo`: HuggingFace repository used when the directory is missing
/// - `tokenizer_path`: optional `tokenizer.json` used for context windowing;
///   whitespace tokenization is used when absent
/// - `device`: `auto`, `cpu`, `cuda` or `metal`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub classifier_backend: String,
    pub classifier_model_dir: String,
    pub classifier_repo: String,
    pub tokenizer_path: Option<String>,
    pub device: String,
}

/// Call session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Token ceiling for a call's context window
    pub max_context_tokens: usize,
    /// Tokens kept after the ceiling is crossed (must be below the ceiling)
    pub truncated_retain_tokens: usize,
    /// Seconds of inactivity after which a call counts as abandoned
    pub abandoned_call_timeout_secs: u64,
    /// Seconds between two abandoned-call sweeps
    pub sweep_interval_secs: u64,
}

/// Durable storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: String,
    /// Spool file for finalized records whose database write failed
    pub pending_queue_path: String,
    /// Database write attempts before a record is spooled
    pub write_attempts: u32,
    /// Backoff before the second attempt; doubled after every failure
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub allowed_formats: Vec<String>,
    pub max_chunk_bytes: usize,
}

/// External speech-to-text command.
///
/// The audio chunk is written to the command's stdin and the transcript is
/// read from stdout. `{format}` in an argument is replaced with the container
/// extension (`wav`, `mp3`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

/// Offline training pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub base_corpus_path: String,
    pub output_corpus_path: String,
    pub dataset_version: String,
    pub model_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            models: ModelsConfig {
                classifier_backend: "distilbert".to_string(),
                classifier_model_dir: "model/scam_detector".to_string(),
                classifier_repo: "distilbert-base-uncased".to_string(),
                tokenizer_path: None,
                device: "auto".to_string(),
            },
            session: SessionConfig {
                max_context_tokens: 512,
                truncated_retain_tokens: 412,
                abandoned_call_timeout_secs: 30,
                sweep_interval_secs: 10,
            },
            storage: StorageConfig {
                database_path: "scam_calls.db".to_string(),
                pending_queue_path: "pending_call_records.jsonl".to_string(),
                write_attempts: 3,
                retry_backoff_ms: 100,
            },
            audio: AudioConfig {
                allowed_formats: ["mp3", "wav", "3gp", "mpeg", "m4a", "ogg", "flac"]
                    .iter()
                    .map(|f| f.to_string())
                    .collect(),
                max_chunk_bytes: 10 * 1024 * 1024,
            },
            transcription: TranscriptionConfig {
                command: None,
                args: Vec::new(),
                timeout_secs: 30,
            },
            training: TrainingConfig {
                base_corpus_path: "dataset.csv".to_string(),
                output_corpus_path: "dataset.merged.csv".to_string(),
                dataset_version: "1.0".to_string(),
                model_name: "distilbert-base-uncased".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.session.max_context_tokens == 0 {
            return Err(anyhow::anyhow!("max_context_tokens must be greater than 0"));
        }

        // Truncation must cut below the ceiling, otherwise every merge after
        // the first overflow would truncate again.
        if self.session.truncated_retain_tokens == 0
            || self.session.truncated_retain_tokens >= self.session.max_context_tokens
        {
            return Err(anyhow::anyhow!(
                "truncated_retain_tokens ({}) must be in 1..{}",
                self.session.truncated_retain_tokens,
                self.session.max_context_tokens
            ));
        }

        if self.session.abandoned_call_timeout_secs == 0 {
            return Err(anyhow::anyhow!("abandoned_call_timeout_secs must be greater than 0"));
        }

        if self.session.sweep_interval_secs == 0 {
            return Err(anyhow::anyhow!("sweep_interval_secs must be greater than 0"));
        }

        if self.storage.write_attempts == 0 {
            return Err(anyhow::anyhow!("write_attempts must be at least 1"));
        }

        if self.audio.allowed_formats.is_empty() {
            return Err(anyhow::anyhow!("At least one audio format must be allowed"));
        }

        match self.models.classifier_backend.as_str() {
            "distilbert" | "lexicon" => {}
            other => {
                return Err(anyhow::anyhow!("Unknown classifier backend: {}", other));
            }
        }

        Ok(())
    }

    pub fn abandoned_call_timeout(&self) -> Duration {
        Duration::from_secs(self.session.abandoned_call_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session.sweep_interval_secs)
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// Only the session sweep timing and the server block can change at
    /// runtime; token limits are fixed for the lifetime of the session store.
    /// Send e.g. `{"session": {"abandoned_call_timeout_secs": 60}}`.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Port out of range: {}", port))?;
            }
        }

        if let Some(session) = partial_config.get("session") {
            if let Some(timeout) = session
                .get("abandoned_call_timeout_secs")
                .and_then(|v| v.as_u64())
            {
                self.session.abandoned_call_timeout_secs = timeout;
            }
            if let Some(interval) = session.get("sweep_interval_secs").and_then(|v| v.as_u64()) {
                self.session.sweep_interval_secs = interval;
            }
        }

        self.validate()?;
        Ok(())
    }
}
