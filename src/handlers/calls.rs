//! # Call REST API Handlers
//!
//! Thin HTTP adapters over [`CallService`](crate::calls::CallService).
//!
//! ## Available Endpoints:
//! - `POST /api/v1/detect-scam` - Score one base64 audio chunk of a live call
//! - `POST /api/v1/save-call` - End a call and store its record
//! - `PUT /api/v1/calls/{call_id}/feedback` - Attach feedback to a stored call
//! - `GET|POST /api/v1/abandoned-calls` - Evict calls idle past the timeout

use crate::audio;
use crate::calls::Persistence;
use crate::error::AppError;
use crate::state::AppState;
use crate::storage::UserFeedback;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct DetectScamRequest {
    pub call_id: String,
    /// Base64-encoded audio chunk
    pub base64: String,
    /// Container format; sniffed from the bytes when absent
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SaveCallRequest {
    pub call_id: String,
    pub caller_number: Option<String>,
    /// `correct`, `incorrect` or `none`
    pub user_feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub user_feedback: String,
}

/// Score one audio chunk against the call's accumulated context.
///
/// ## Response:
/// ```json
/// {
///   "call_id": "c1",
///   "scam_probability": 0.91,
///   "status": "Scam",
///   "status_color": "red",
///   "transcription": "send money now"
/// }
/// ```
pub async fn detect_scam(
    state: web::Data<AppState>,
    body: web::Json<DetectScamRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    let audio_bytes = audio::decode_base64(&request.base64)?;

    let report = state
        .calls()
        .process_chunk(&request.call_id, &audio_bytes, request.format.as_deref())
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "call_id": report.assessment.call_id,
        "scam_probability": report.assessment.probability,
        "status": report.assessment.status,
        "status_color": report.assessment.status.color(),
        "transcription": report.transcription,
        "format": report.format,
    })))
}

/// End a call. Responds 201 when stored, 202 when parked in the pending queue.
pub async fn save_call(
    state: web::Data<AppState>,
    body: web::Json<SaveCallRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    let feedback = request
        .user_feedback
        .as_deref()
        .map(str::parse::<UserFeedback>)
        .transpose()?;

    let outcome = state
        .calls()
        .finalize_call(&request.call_id, request.caller_number, feedback)
        .await?;

    let (mut response, message) = match outcome.persistence {
        Persistence::Stored => (HttpResponse::Created(), "Call data saved successfully."),
        Persistence::Queued => (
            HttpResponse::Accepted(),
            "Call data queued; it will be saved once storage recovers.",
        ),
    };
    Ok(response.json(json!({
        "message": message,
        "persistence": outcome.persistence,
        "record": outcome.record,
    })))
}

pub async fn record_feedback(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<FeedbackRequest>,
) -> Result<HttpResponse, AppError> {
    let call_id = path.into_inner();
    let feedback: UserFeedback = body.user_feedback.parse()?;

    state.calls().record_feedback(&call_id, feedback).await?;

    Ok(HttpResponse::Ok().json(json!({
        "call_id": call_id,
        "user_feedback": feedback,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

pub async fn abandoned_calls(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let removed = state.calls().sweep_abandoned().await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": format!("Removed {} abandoned calls.", removed),
        "removed": removed,
    })))
}
