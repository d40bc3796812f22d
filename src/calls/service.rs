//! Transport-independent call operations.
//!
//! The HTTP handlers are thin adapters over [`CallService`]; anything that can
//! be done to a call can be done here without a web server.

use crate::audio::{self, AudioFormat};
use crate::calls::finalize::{FinalizationService, FinalizeOutcome};
use crate::calls::orchestrator::{ChunkAssessment, InferenceOrchestrator};
use crate::config::AudioConfig;
use crate::error::{AppError, AppResult};
use crate::session::SweepScheduler;
use crate::storage::{ModelMetadata, PersistenceGateway, UserFeedback};
use crate::transcription::Transcriber;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Everything the client learns about one processed chunk.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkReport {
    pub format: AudioFormat,
    pub transcription: String,
    pub assessment: ChunkAssessment,
}

pub struct CallService {
    audio: AudioConfig,
    transcriber: Arc<dyn Transcriber>,
    orchestrator: Arc<InferenceOrchestrator>,
    finalizer: FinalizationService,
    sweeper: Arc<SweepScheduler>,
    gateway: Arc<dyn PersistenceGateway>,
}

impl CallService {
    pub fn new(
        audio: AudioConfig,
        transcriber: Arc<dyn Transcriber>,
        orchestrator: Arc<InferenceOrchestrator>,
        finalizer: FinalizationService,
        sweeper: Arc<SweepScheduler>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Self {
        Self {
            audio,
            transcriber,
            orchestrator,
            finalizer,
            sweeper,
            gateway,
        }
    }

    pub fn sweeper(&self) -> &Arc<SweepScheduler> {
        &self.sweeper
    }

    /// Validate, transcribe and score one audio chunk.
    pub async fn process_chunk(
        &self,
        call_id: &str,
        audio_bytes: &[u8],
        declared_format: Option<&str>,
    ) -> AppResult<ChunkReport> {
        validate_call_id(call_id)?;
        let format = audio::resolve_format(
            audio_bytes,
            declared_format,
            &self.audio.allowed_formats,
            self.audio.max_chunk_bytes,
        )?;

        let transcription = self.transcriber.transcribe(audio_bytes, format).await?;

        let orchestrator = Arc::clone(&self.orchestrator);
        let id = call_id.to_string();
        let text = transcription.clone();
        let assessment = tokio::task::spawn_blocking(move || orchestrator.handle_chunk(&id, &text))
            .await
            .map_err(|e| AppError::Internal(format!("Scoring task failed: {}", e)))??;

        Ok(ChunkReport {
            format,
            transcription,
            assessment,
        })
    }

    pub async fn finalize_call(
        &self,
        call_id: &str,
        caller_number: Option<String>,
        user_feedback: Option<UserFeedback>,
    ) -> AppResult<FinalizeOutcome> {
        validate_call_id(call_id)?;
        self.finalizer
            .finalize(call_id, caller_number, user_feedback)
            .await
    }

    /// Evict abandoned calls now and return how many were removed.
    pub async fn sweep_abandoned(&self) -> AppResult<usize> {
        let sweeper = Arc::clone(&self.sweeper);
        let removed = tokio::task::spawn_blocking(move || sweeper.sweep())
            .await
            .map_err(|e| AppError::Internal(format!("Sweep task failed: {}", e)))?;
        info!("Manual sweep removed {} abandoned calls", removed);
        Ok(removed)
    }

    pub async fn latest_model_metadata(&self) -> AppResult<Option<ModelMetadata>> {
        let gateway = Arc::clone(&self.gateway);
        tokio::task::spawn_blocking(move || gateway.latest_model_metadata())
            .await
            .map_err(|e| AppError::Internal(format!("Metadata task failed: {}", e)))?
    }

    /// Attach feedback to an already finalized call.
    pub async fn record_feedback(&self, call_id: &str, feedback: UserFeedback) -> AppResult<()> {
        validate_call_id(call_id)?;
        let gateway = Arc::clone(&self.gateway);
        let id = call_id.to_string();
        let updated = tokio::task::spawn_blocking(move || gateway.update_feedback(&id, feedback))
            .await
            .map_err(|e| AppError::Internal(format!("Feedback task failed: {}", e)))??;

        if !updated {
            return Err(AppError::NotFound(format!("No finalized call '{}'", call_id)));
        }
        info!(call_id = %call_id, feedback = feedback.as_str(), "Feedback recorded");
        Ok(())
    }
}

fn validate_call_id(call_id: &str) -> AppResult<()> {
    if call_id.trim().is_empty() {
        return Err(AppError::ValidationError("call_id must not be empty".to_string()));
    }
    Ok(())
}
