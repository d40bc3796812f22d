use crate::{config::AppConfig, error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Runtime view of the configuration. Storage paths and the transcription
/// command are deployment details and are left out.
fn config_view(config: &AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "models": {
            "classifier_backend": config.models.classifier_backend,
            "classifier_repo": config.models.classifier_repo,
            "device": config.models.device
        },
        "session": {
            "max_context_tokens": config.session.max_context_tokens,
            "truncated_retain_tokens": config.session.truncated_retain_tokens,
            "abandoned_call_timeout_secs": config.session.abandoned_call_timeout_secs,
            "sweep_interval_secs": config.session.sweep_interval_secs
        },
        "audio": {
            "allowed_formats": config.audio.allowed_formats,
            "max_chunk_bytes": config.audio.max_chunk_bytes
        },
        "storage": {
            "write_attempts": config.storage.write_attempts,
            "retry_backoff_ms": config.storage.retry_backoff_ms
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_view(&config)
    })))
}

/// Apply a partial JSON update, e.g.
/// `{"session": {"abandoned_call_timeout_secs": 60}}`.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_view(&current_config)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use std::time::Duration;

    #[actix_web::test]
    async fn test_update_session_timing() {
        let dir = tempfile::tempdir().unwrap();
        let state = web::Data::new(test_state(dir.path()));
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/config", web::get().to(get_config))
                .route("/config", web::put().to(update_config)),
        )
        .await;

        let resp: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::put()
                .uri("/config")
                .set_json(json!({"session": {"abandoned_call_timeout_secs": 45}}))
                .to_request(),
        )
        .await;
        assert_eq!(resp["updated_config"]["session"]["abandoned_call_timeout_secs"], 45);
        assert_eq!(
            state.services.calls.sweeper().timing().abandoned_timeout,
            Duration::from_secs(45)
        );

        let resp: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/config").to_request(),
        )
        .await;
        assert_eq!(resp["config"]["session"]["max_context_tokens"], 512);
    }

    #[actix_web::test]
    async fn test_invalid_update_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = web::Data::new(test_state(dir.path()));
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/config", web::put().to(update_config)),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::put()
                .uri("/config")
                .set_json(json!({"session": {"sweep_interval_secs": 0}}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.get_config().session.sweep_interval_secs, 10);
    }
}
