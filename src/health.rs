use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::sync::Arc;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let active_calls = state.active_calls();
    // Reading the spool is file I/O under the queue lock.
    let pending = Arc::clone(&state.services.pending);
    let pending_records = web::block(move || pending.len())
        .await
        .ok()
        .and_then(Result::ok);

    let status = match pending_records {
        Some(0) => "healthy",
        // Records are waiting for the database, or the spool is unreadable.
        _ => "degraded",
    };

    HttpResponse::Ok().json(json!({
        "status": status,
        "message": "Scam Detection API is running.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
        },
        "calls": {
            "active": active_calls,
            "abandoned_timeout_secs": config.session.abandoned_call_timeout_secs,
            "pending_records": pending_records
        },
        "classifier": {
            "backend": state.services.model.backend,
            "version": state.services.model.version
        },
        "memory": get_memory_info()
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "active_calls": state.active_calls(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info()
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let field_bytes = |name: &str| -> u64 {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };

            return json!({
                "resident_memory_bytes": field_bytes("VmRSS:"),
                "virtual_memory_bytes": field_bytes("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::CallStatus;
    use crate::state::test_support::test_state;
    use crate::storage::CallRecord;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_reports_calls_and_classifier() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.services.sessions.append_chunk("c1", "hello").unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;
        let resp: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health").to_request())
                .await;

        assert_eq!(resp["status"], "healthy");
        assert_eq!(resp["calls"]["active"], 1);
        assert_eq!(resp["classifier"]["backend"], "lexicon");
        assert_eq!(resp["classifier"]["version"], "lexicon-v1");
    }

    #[actix_web::test]
    async fn test_health_degraded_while_records_are_queued() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let now = chrono::Utc::now();
        state
            .services
            .pending
            .enqueue(&CallRecord {
                call_id: "c1".to_string(),
                start_time: now,
                end_time: now,
                duration_secs: 1.0,
                caller_number: None,
                full_transcription: "hello".to_string(),
                user_feedback: None,
                final_status: CallStatus::Safe,
                model_version: "lexicon-v1".to_string(),
            })
            .unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;
        let resp: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health").to_request())
                .await;

        assert_eq!(resp["status"], "degraded");
        assert_eq!(resp["calls"]["pending_records"], 1);
    }
}
