//! # ScamShield Backend - Main Application Entry Point
//!
//! Runs the scam call detection HTTP server, plus two offline commands used by
//! the retraining workflow.
//!
//! ## Commands:
//! - `serve` (default): HTTP API for live chunk scoring and call records
//! - `assemble-dataset`: merge the base corpus with feedback-derived labels
//! - `record-training`: append a row to the model history after a training run
//!
//! ## Application Architecture:
//! - **session**: per-call context windows and the abandoned call sweep
//! - **classifier**: scam probability scoring and status bands
//! - **transcription** / **audio**: audio chunk validation and speech-to-text
//! - **calls**: chunk scoring, call finalization and the service facade
//! - **storage**: SQLite call records, model history and the pending queue
//! - **training**: feedback labels and corpus assembly
//! - **handlers** / **health** / **middleware**: the HTTP adapter

mod audio;
mod calls;
mod classifier;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod session;
mod state;
mod storage;
mod tokenize;
mod training;
mod transcription;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::AppConfig;
use state::{AppState, Services};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use storage::{NewModelMetadata, PersistenceGateway, SqliteGateway};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set on SIGINT/SIGTERM. Stops the HTTP server and the sweep task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "scamshield-backend", version, about = "Scam call detection backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve,
    /// Merge the base corpus with labels derived from user feedback
    AssembleDataset {
        /// Base corpus (CSV); defaults to training.base_corpus_path
        #[arg(long)]
        base: Option<String>,
        /// Output corpus (CSV); defaults to training.output_corpus_path
        #[arg(long)]
        out: Option<String>,
    },
    /// Record the result of a training run in the model history
    RecordTraining {
        #[arg(long)]
        accuracy: Option<f64>,
        #[arg(long)]
        epochs: u32,
        #[arg(long, default_value_t = 2)]
        labels: u32,
        #[arg(long)]
        model_name: Option<String>,
        #[arg(long)]
        dataset_version: Option<String>,
    },
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();

    let config = AppConfig::load()?;
    config.validate()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::AssembleDataset { base, out } => {
            let gateway = SqliteGateway::open(&config.storage.database_path)?;
            let base = base.unwrap_or(config.training.base_corpus_path);
            let out = out.unwrap_or(config.training.output_corpus_path);

            let report = training::assemble(&gateway, &base, &out)
                .with_context(|| format!("Failed to assemble corpus from {}", base))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::RecordTraining {
            accuracy,
            epochs,
            labels,
            model_name,
            dataset_version,
        } => {
            if let Some(accuracy) = accuracy {
                if !(0.0..=1.0).contains(&accuracy) {
                    anyhow::bail!("accuracy must be in [0, 1], got {}", accuracy);
                }
            }
            let gateway = SqliteGateway::open(&config.storage.database_path)?;
            let model_id = gateway.append_model_metadata(&NewModelMetadata {
                model_name: model_name.unwrap_or(config.training.model_name),
                dataset_version: dataset_version.unwrap_or(config.training.dataset_version),
                accuracy,
                training_epochs: epochs,
                number_labels: labels,
            })?;
            info!(model_id, "Model metadata recorded");
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    info!("Starting scamshield-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let services = Services::from_config(&config).await?;
    info!(
        backend = %services.model.backend,
        version = %services.model.version,
        "Classifier ready"
    );

    // Records parked by a previous run go in before new traffic arrives.
    let pending = Arc::clone(&services.pending);
    let gateway = Arc::clone(&services.gateway);
    match tokio::task::spawn_blocking(move || pending.drain(gateway.as_ref())).await? {
        Ok(report) if report != storage::DrainReport::default() => {
            info!(
                stored = report.stored,
                remaining = report.remaining,
                quarantined = report.quarantined,
                "Replayed pending call records"
            );
        }
        Ok(_) => {}
        Err(e) => warn!("Pending call records not replayed: {}", e),
    }

    let sweep_task = Arc::clone(services.calls.sweeper()).spawn(&SHUTDOWN_SIGNAL);

    let app_state = AppState::new(config.clone(), services);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().limit(16 * 1024 * 1024))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/detect-scam", web::post().to(handlers::detect_scam))
                    .route("/save-call", web::post().to(handlers::save_call))
                    .route(
                        "/calls/{call_id}/feedback",
                        web::put().to(handlers::record_feedback),
                    )
                    .route("/abandoned-calls", web::get().to(handlers::abandoned_calls))
                    .route("/abandoned-calls", web::post().to(handlers::abandoned_calls))
                    .route("/model-info", web::get().to(handlers::model_info))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    if let Err(e) = sweep_task.await {
        warn!("Sweep task ended abnormally: {}", e);
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` controls the filter; defaults to
/// `scamshield_backend=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scamshield_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    return;
                }
            };
        let mut sigint =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()) {
                Ok(signal) => signal,
                Err(e) => {
                    error!("Failed to install SIGINT handler: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
