//! # Application State Management
//!
//! Shared state handed to every HTTP handler, plus the wiring that builds the
//! call services from configuration.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: many handlers hold a reference to the same value
//! - **RwLock**: many concurrent readers or one writer
//! - Used for the runtime-updatable config and the request metrics
//!
//! ### Trait objects behind Arc
//! - The classifier, transcriber and persistence gateway are `Arc<dyn Trait>`
//! - They are chosen once at startup from config and never swapped afterwards
//!
//! ## Lock poisoning:
//! A panic while holding one of these locks poisons it. The data behind them
//! (counters, a config snapshot) stays usable, so the guard is recovered with
//! `PoisonError::into_inner` instead of propagating the panic to every request.

use crate::calls::{CallService, FinalizationService, InferenceOrchestrator, RetryPolicy};
use crate::classifier::device::device_from_config;
use crate::classifier::distilbert::ModelFiles;
use crate::classifier::{Classifier, DistilBertClassifier, LexiconClassifier};
use crate::config::AppConfig;
use crate::session::{SessionStore, SweepScheduler, SweepTiming, WindowLimits};
use crate::storage::{PendingRecordQueue, PersistenceGateway, SqliteGateway};
use crate::tokenize::{HfTokenizer, TextTokenizer, WhitespaceTokenizer};
use crate::transcription;
use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// The call-handling object graph built from configuration.
///
/// Every component gets its collaborators through its constructor; nothing
/// here is a global.
#[derive(Clone)]
pub struct Services {
    pub calls: Arc<CallService>,
    pub sessions: Arc<SessionStore>,
    pub gateway: Arc<dyn PersistenceGateway>,
    pub pending: Arc<PendingRecordQueue>,
    pub model: ModelSummary,
}

/// What the health endpoint reports about the loaded classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSummary {
    pub backend: String,
    pub version: String,
}

impl Services {
    /// Load the classifier and open storage as `config` describes.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let (classifier, tokenizer) = load_classifier(config).await?;
        let gateway: Arc<dyn PersistenceGateway> =
            Arc::new(SqliteGateway::open(&config.storage.database_path)?);
        let pending = Arc::new(PendingRecordQueue::new(&config.storage.pending_queue_path));

        Ok(Self::assemble(config, classifier, tokenizer, gateway, pending))
    }

    /// Wire already constructed capabilities together.
    pub fn assemble(
        config: &AppConfig,
        classifier: Arc<dyn Classifier>,
        tokenizer: Arc<dyn TextTokenizer>,
        gateway: Arc<dyn PersistenceGateway>,
        pending: Arc<PendingRecordQueue>,
    ) -> Self {
        let sessions = Arc::new(SessionStore::new(
            tokenizer,
            WindowLimits::new(
                config.session.max_context_tokens,
                config.session.truncated_retain_tokens,
            ),
        ));
        let sweeper = Arc::new(
            SweepScheduler::new(Arc::clone(&sessions), sweep_timing(config))
                .with_pending_replay(Arc::clone(&pending), Arc::clone(&gateway)),
        );
        let orchestrator = Arc::new(InferenceOrchestrator::new(
            Arc::clone(&sessions),
            Arc::clone(&classifier),
        ));
        let finalizer = FinalizationService::new(
            Arc::clone(&sessions),
            Arc::clone(&classifier),
            Arc::clone(&gateway),
            Arc::clone(&pending),
            RetryPolicy {
                attempts: config.storage.write_attempts,
                initial_backoff: Duration::from_millis(config.storage.retry_backoff_ms),
            },
        );
        let calls = Arc::new(CallService::new(
            config.audio.clone(),
            transcription::from_config(&config.transcription),
            orchestrator,
            finalizer,
            sweeper,
            Arc::clone(&gateway),
        ));

        Self {
            calls,
            sessions,
            gateway,
            pending,
            model: ModelSummary {
                backend: config.models.classifier_backend.clone(),
                version: classifier.model_version().to_string(),
            },
        }
    }
}

pub fn sweep_timing(config: &AppConfig) -> SweepTiming {
    SweepTiming {
        abandoned_timeout: config.abandoned_call_timeout(),
        interval: config.sweep_interval(),
    }
}

async fn load_classifier(
    config: &AppConfig,
) -> Result<(Arc<dyn Classifier>, Arc<dyn TextTokenizer>)> {
    let models = &config.models;
    let explicit_tokenizer = match &models.tokenizer_path {
        Some(path) => Some(Arc::new(HfTokenizer::from_file(path)?) as Arc<dyn TextTokenizer>),
        None => None,
    };

    match models.classifier_backend.as_str() {
        "lexicon" => {
            info!("Using lexicon classifier");
            let classifier: Arc<dyn Classifier> = Arc::new(LexiconClassifier::new());
            let tokenizer = explicit_tokenizer
                .unwrap_or_else(|| Arc::new(WhitespaceTokenizer) as Arc<dyn TextTokenizer>);
            Ok((classifier, tokenizer))
        }
        _ => {
            let files =
                ModelFiles::resolve(&models.classifier_model_dir, &models.classifier_repo).await?;
            let version = Path::new(&models.classifier_model_dir)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| models.classifier_repo.clone());
            let device = device_from_config(&models.device);
            let classifier = DistilBertClassifier::load(&files, device, version)?;

            // The context window counts tokens in the classifier's own vocabulary.
            let tokenizer: Arc<dyn TextTokenizer> = match explicit_tokenizer {
                Some(tokenizer) => tokenizer,
                None => Arc::new(HfTokenizer::from_file(&files.tokenizer)?),
            };
            let classifier: Arc<dyn Classifier> = Arc::new(classifier);
            Ok((classifier, tokenizer))
        }
    }
}

/// State shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request metrics, updated by the metrics middleware on every request
    pub metrics: Arc<RwLock<AppMetrics>>,

    pub services: Services,

    /// When the server started
    pub start_time: Instant,
}

/// Request metrics collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Key: endpoint name (e.g., "POST /api/v1/detect-scam")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, services: Services) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            services,
            start_time: Instant::now(),
        }
    }

    pub fn calls(&self) -> &CallService {
        &self.services.calls
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate and install `new_config`, pushing sweep timing to the sweeper.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        self.services
            .calls
            .sweeper()
            .set_timing(sweep_timing(&new_config));
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
        Ok(())
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.error_count += 1;
    }

    /// Record timing and outcome for one request to `endpoint`.
    ///
    /// The first time we see an endpoint, we create a new EndpointMetric with
    /// default values.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Calls currently in progress.
    pub fn active_calls(&self) -> usize {
        self.services.sessions.active_count()
    }

    /// Snapshot of current metrics, taken so the lock is not held while
    /// serializing a response.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
