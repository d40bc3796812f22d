//! Live scoring of a call as its chunks arrive.

use crate::classifier::{checked_score, CallStatus, Classifier};
use crate::error::{AppError, AppResult};
use crate::session::SessionStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of scoring one chunk against the call's accumulated context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkAssessment {
    pub call_id: String,
    pub context: String,
    pub probability: f64,
    pub status: CallStatus,
}

pub struct InferenceOrchestrator {
    store: Arc<SessionStore>,
    classifier: Arc<dyn Classifier>,
}

impl InferenceOrchestrator {
    pub fn new(store: Arc<SessionStore>, classifier: Arc<dyn Classifier>) -> Self {
        Self { store, classifier }
    }

    /// Append `transcript` to the call and score the whole bounded context.
    ///
    /// An empty transcript is rejected before the session is touched. If the
    /// classifier fails the chunk stays recorded, so a retry loses nothing.
    pub fn handle_chunk(&self, call_id: &str, transcript: &str) -> AppResult<ChunkAssessment> {
        if transcript.trim().is_empty() {
            return Err(AppError::TranscriptionError(
                "Transcript is empty or unintelligible".to_string(),
            ));
        }

        let context = self.store.append_chunk(call_id, transcript)?;
        let probability = checked_score(self.classifier.as_ref(), &context).map_err(|e| {
            warn!(call_id = %call_id, "Scoring failed, chunk kept: {}", e);
            e
        })?;
        let status = CallStatus::from_probability(probability);

        debug!(
            call_id = %call_id,
            probability = probability,
            status = %status,
            "Chunk scored"
        );

        Ok(ChunkAssessment {
            call_id: call_id.to_string(),
            context,
            probability,
            status,
        })
    }
}
