//! # Transcription
//!
//! Speech-to-text sits behind the [`Transcriber`] trait. The service only
//! needs "audio bytes in, text out"; which recognizer produces the text is a
//! deployment decision.
//!
//! ## Backends:
//! - **CommandTranscriber**: pipes the chunk into an external recognizer
//!   process (stdin) and reads the transcript from its stdout
//! - **UnavailableTranscriber**: used when no recognizer is configured; every
//!   call fails with a transcription error
//!
//! ## Command contract:
//! Arguments may contain `{format}`, replaced with the chunk's format
//! extension. Exit status 0 with non-empty stdout is a transcript; anything
//! else is a [`AppError::TranscriptionError`].

use crate::audio::AudioFormat;
use crate::config::TranscriptionConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Convert one audio chunk to text.
    async fn transcribe(&self, audio: &[u8], format: AudioFormat) -> AppResult<String>;
}

/// Build the transcriber described by `config`.
pub fn from_config(config: &TranscriptionConfig) -> Arc<dyn Transcriber> {
    match &config.command {
        Some(command) if !command.trim().is_empty() => Arc::new(CommandTranscriber::new(
            command.clone(),
            config.args.clone(),
            Duration::from_secs(config.timeout_secs),
        )),
        _ => {
            warn!("No transcription command configured; audio chunks will be rejected");
            Arc::new(UnavailableTranscriber)
        }
    }
}

pub struct CommandTranscriber {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandTranscriber {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    fn args_for(&self, format: AudioFormat) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace("{format}", format.extension()))
            .collect()
    }
}

#[async_trait]
impl Transcriber for CommandTranscriber {
    async fn transcribe(&self, audio: &[u8], format: AudioFormat) -> AppResult<String> {
        let mut child = Command::new(&self.program)
            .args(self.args_for(format))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::TranscriptionError(format!("Failed to start {}: {}", self.program, e))
            })?;

        // Feed stdin from a separate task so a recognizer that streams its
        // output cannot deadlock against a full stdin pipe.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::TranscriptionError("Recognizer stdin unavailable".to_string()))?;
        let input = audio.to_vec();
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&input).await;
            drop(stdin);
            result
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                AppError::TranscriptionError(format!(
                    "Recognizer timed out after {:?}",
                    self.timeout
                ))
            })?
            .map_err(|e| AppError::TranscriptionError(format!("Recognizer failed: {}", e)))?;

        if let Ok(Err(e)) = writer.await {
            // The recognizer may legitimately stop reading early.
            debug!("Recognizer closed stdin early: {}", e);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::TranscriptionError(format!(
                "Recognizer exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Err(AppError::TranscriptionError(
                "Could not understand audio".to_string(),
            ));
        }

        debug!(format = %format, chars = text.len(), "Chunk transcribed");
        Ok(text)
    }
}

pub struct UnavailableTranscriber;

#[async_trait]
impl Transcriber for UnavailableTranscriber {
    async fn transcribe(&self, _audio: &[u8], _format: AudioFormat) -> AppResult<String> {
        Err(AppError::TranscriptionError(
            "No speech recognizer is configured".to_string(),
        ))
    }
}
