//! # Model Information Handler
//!
//! ## Endpoint: `GET /api/v1/model-info`
//!
//! Returns the most recent row of the model history together with the
//! classifier actually serving requests.
//!
//! ## Response:
//! ```json
//! {
//!   "model_name": "distilbert-base-uncased",
//!   "training_date": "2024-05-01T12:00:00+00:00",
//!   "dataset_version": "1.0",
//!   "accuracy": 0.94,
//!   "training_epochs": 3,
//!   "number_labels": 2,
//!   "serving": { "backend": "distilbert", "version": "scam_detector" }
//! }
//! ```
//! With no history every metadata field is `null` and `model_name` says so.

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn model_info(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let latest = state.calls().latest_model_metadata().await?;
    let serving = json!({
        "backend": state.services.model.backend,
        "version": state.services.model.version,
    });

    let body = match latest {
        Some(metadata) => json!({
            "model_id": metadata.model_id,
            "model_name": metadata.model_name,
            "training_date": metadata.training_date,
            "dataset_version": metadata.dataset_version,
            "accuracy": metadata.accuracy,
            "training_epochs": metadata.training_epochs,
            "number_labels": metadata.number_labels,
            "serving": serving,
        }),
        None => json!({
            "model_id": null,
            "model_name": "No model metadata found",
            "training_date": null,
            "dataset_version": null,
            "accuracy": null,
            "training_epochs": null,
            "number_labels": null,
            "serving": serving,
        }),
    };
    Ok(HttpResponse::Ok().json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use crate::storage::NewModelMetadata;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_model_info_empty_then_latest() {
        let dir = tempfile::tempdir().unwrap();
        let state = web::Data::new(test_state(dir.path()));
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/model-info", web::get().to(model_info)),
        )
        .await;

        let resp: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/model-info").to_request(),
        )
        .await;
        assert_eq!(resp["model_name"], "No model metadata found");
        assert!(resp["accuracy"].is_null());
        assert_eq!(resp["serving"]["backend"], "lexicon");

        for (version, epochs) in [("1.0", 3), ("1.1", 4)] {
            state
                .services
                .gateway
                .append_model_metadata(&NewModelMetadata {
                    model_name: "distilbert-base-uncased".to_string(),
                    dataset_version: version.to_string(),
                    accuracy: Some(0.9),
                    training_epochs: epochs,
                    number_labels: 2,
                })
                .unwrap();
        }

        let resp: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/model-info").to_request(),
        )
        .await;
        assert_eq!(resp["dataset_version"], "1.1");
        assert_eq!(resp["training_epochs"], 4);
    }
}
