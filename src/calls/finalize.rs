//! # Call Finalization
//!
//! Ends a call exactly once: claims the session, settles its final status and
//! hands the record to persistence.
//!
//! ## Final status:
//! Only the **last chunk** is scored, not the accumulated context. A call with
//! no chunks, or one whose final scoring fails, is saved as `Unknown`.
//!
//! ## Durability:
//! The session is gone from the store once claimed, so the record must not be
//! dropped on a failed write:
//! ```text
//! insert ──fail──> backoff, retry (write_attempts total)
//!   │                 └──all failed──> pending queue (fsynced) ──> Queued
//!   │                                      └──fail──> PersistenceError
//!   └──different record already stored under the id──> Conflict
//! ```
//! A conflict is not retried or queued: the stored record wins.

use crate::classifier::{checked_score, CallStatus, Classifier};
use crate::error::{AppError, AppResult};
use crate::session::{CallSession, SessionStore};
use crate::storage::{CallRecord, PendingRecordQueue, PersistenceGateway, UserFeedback};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Bounded retry for record writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Delay before the second attempt; doubled for each one after.
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    fn backoff(&self, failed_attempts: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(failed_attempts.saturating_sub(1)))
    }
}

/// Where the finalized record ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Persistence {
    Stored,
    Queued,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizeOutcome {
    pub record: CallRecord,
    pub persistence: Persistence,
}

pub struct FinalizationService {
    store: Arc<SessionStore>,
    classifier: Arc<dyn Classifier>,
    gateway: Arc<dyn PersistenceGateway>,
    pending: Arc<PendingRecordQueue>,
    retry: RetryPolicy,
}

impl FinalizationService {
    pub fn new(
        store: Arc<SessionStore>,
        classifier: Arc<dyn Classifier>,
        gateway: Arc<dyn PersistenceGateway>,
        pending: Arc<PendingRecordQueue>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            classifier,
            gateway,
            pending,
            retry,
        }
    }

    pub async fn finalize(
        &self,
        call_id: &str,
        caller_number: Option<String>,
        user_feedback: Option<UserFeedback>,
    ) -> AppResult<FinalizeOutcome> {
        let session = self
            .store
            .claim_and_remove(call_id)
            .ok_or_else(|| AppError::SessionNotFound(call_id.to_string()))?;

        let final_status = self.final_status(&session).await;
        let record = build_record(
            session,
            caller_number,
            user_feedback,
            final_status,
            self.classifier.model_version(),
        );

        let persistence = self.persist(&record).await?;
        info!(
            call_id = %record.call_id,
            status = %record.final_status,
            duration_secs = record.duration_secs,
            persistence = ?persistence,
            "Call finalized"
        );
        Ok(FinalizeOutcome {
            record,
            persistence,
        })
    }

    async fn final_status(&self, session: &CallSession) -> CallStatus {
        let Some(last_chunk) = session.last_chunk().map(str::to_string) else {
            return CallStatus::Unknown;
        };

        let classifier = Arc::clone(&self.classifier);
        let scored =
            tokio::task::spawn_blocking(move || checked_score(classifier.as_ref(), &last_chunk))
                .await;
        match scored {
            Ok(Ok(probability)) => CallStatus::from_probability(probability),
            Ok(Err(e)) => {
                warn!(call_id = %session.call_id, "Final scoring failed, status Unknown: {}", e);
                CallStatus::Unknown
            }
            Err(e) => {
                warn!(call_id = %session.call_id, "Final scoring task failed: {}", e);
                CallStatus::Unknown
            }
        }
    }

    async fn persist(&self, record: &CallRecord) -> AppResult<Persistence> {
        let attempts = self.retry.attempts.max(1);
        for attempt in 1..=attempts {
            let gateway = Arc::clone(&self.gateway);
            let to_write = record.clone();
            let result = tokio::task::spawn_blocking(move || gateway.insert_call_record(&to_write))
                .await
                .map_err(|e| AppError::PersistenceError(format!("Write task failed: {}", e)))
                .and_then(|inner| inner);

            match result {
                Ok(()) => return Ok(Persistence::Stored),
                Err(e) if !e.is_retriable() => {
                    error!(
                        record = %serde_json::to_string(record).unwrap_or_default(),
                        "Call record rejected: {}",
                        e
                    );
                    return Err(e);
                }
                Err(e) if attempt < attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        call_id = %record.call_id,
                        attempt = attempt,
                        "Call record write failed, retrying in {:?}: {}",
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        call_id = %record.call_id,
                        "Call record write failed after {} attempts: {}",
                        attempts,
                        e
                    );
                }
            }
        }

        let pending = Arc::clone(&self.pending);
        let to_queue = record.clone();
        let queued = tokio::task::spawn_blocking(move || pending.enqueue(&to_queue))
            .await
            .map_err(|e| AppError::PersistenceError(format!("Queue task failed: {}", e)))
            .and_then(|inner| inner);

        match queued {
            Ok(()) => Ok(Persistence::Queued),
            Err(e) => {
                error!(
                    record = %serde_json::to_string(record).unwrap_or_default(),
                    "Call record could not be stored or queued: {}",
                    e
                );
                Err(AppError::PersistenceError(format!(
                    "Call {} could not be persisted: {}",
                    record.call_id, e
                )))
            }
        }
    }
}

fn build_record(
    session: CallSession,
    caller_number: Option<String>,
    user_feedback: Option<UserFeedback>,
    final_status: CallStatus,
    model_version: &str,
) -> CallRecord {
    // Monotonic clock for the duration so wall-clock jumps cannot make it negative.
    let elapsed = session.started_at.elapsed();
    let end_time = chrono::Duration::from_std(elapsed)
        .map(|d| session.start_time + d)
        .unwrap_or_else(|_| Utc::now());

    CallRecord {
        call_id: session.call_id,
        start_time: session.start_time,
        end_time,
        duration_secs: elapsed.as_secs_f64(),
        caller_number,
        full_transcription: session.context,
        user_feedback,
        final_status,
        model_version: model_version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::WindowLimits;
    use crate::storage::{ModelMetadata, NewModelMetadata, SqliteGateway};
    use crate::tokenize::WhitespaceTokenizer;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Looks probabilities up by exact text; anything else scores 0.1.
    struct Table(HashMap<&'static str, f64>);

    impl Classifier for Table {
        fn score(&self, text: &str) -> AppResult<f64> {
            Ok(*self.0.get(text).unwrap_or(&0.1))
        }

        fn model_version(&self) -> &str {
            "table-v1"
        }
    }

    struct Broken;

    impl Classifier for Broken {
        fn score(&self, _text: &str) -> AppResult<f64> {
            Err(AppError::ClassificationError("model unavailable".to_string()))
        }

        fn model_version(&self) -> &str {
            "broken"
        }
    }

    /// Fails the first `failures` inserts, then delegates.
    struct Flaky {
        inner: SqliteGateway,
        failures: u32,
        calls: AtomicU32,
    }

    impl PersistenceGateway for Flaky {
        fn insert_call_record(&self, record: &CallRecord) -> AppResult<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(AppError::PersistenceError("database is locked".to_string()));
            }
            self.inner.insert_call_record(record)
        }
        fn get_call_record(&self, call_id: &str) -> AppResult<Option<CallRecord>> {
            self.inner.get_call_record(call_id)
        }
        fn update_feedback(&self, call_id: &str, feedback: UserFeedback) -> AppResult<bool> {
            self.inner.update_feedback(call_id, feedback)
        }
        fn records_with_feedback(&self) -> AppResult<Vec<CallRecord>> {
            self.inner.records_with_feedback()
        }
        fn append_model_metadata(&self, metadata: &NewModelMetadata) -> AppResult<i64> {
            self.inner.append_model_metadata(metadata)
        }
        fn latest_model_metadata(&self) -> AppResult<Option<ModelMetadata>> {
            self.inner.latest_model_metadata()
        }
    }

    struct Fixture {
        store: Arc<SessionStore>,
        gateway: Arc<Flaky>,
        pending: Arc<PendingRecordQueue>,
        service: FinalizationService,
        _dir: tempfile::TempDir,
    }

    fn fixture(classifier: Arc<dyn Classifier>, failures: u32) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SessionStore::new(
            Arc::new(WhitespaceTokenizer),
            WindowLimits::new(512, 412),
        ));
        let gateway = Arc::new(Flaky {
            inner: SqliteGateway::open_in_memory().unwrap(),
            failures,
            calls: AtomicU32::new(0),
        });
        let pending = Arc::new(PendingRecordQueue::new(dir.path().join("pending.jsonl")));
        let service = FinalizationService::new(
            Arc::clone(&store),
            classifier,
            gateway.clone(),
            Arc::clone(&pending),
            RetryPolicy {
                attempts: 3,
                initial_backoff: Duration::from_millis(1),
            },
        );
        Fixture {
            store,
            gateway,
            pending,
            service,
            _dir: dir,
        }
    }

    fn scam_table() -> Arc<dyn Classifier> {
        Arc::new(Table(HashMap::from([
            ("send money now", 0.9),
            ("hello send money now", 0.85),
        ])))
    }

    #[tokio::test]
    async fn test_final_status_scores_last_chunk_only() {
        let f = fixture(scam_table(), 0);
        f.store.append_chunk("c1", "hello").unwrap();
        f.store.append_chunk("c1", "send money now").unwrap();

        let outcome = f
            .service
            .finalize("c1", None, Some(UserFeedback::Correct))
            .await
            .unwrap();

        assert_eq!(outcome.persistence, Persistence::Stored);
        assert_eq!(outcome.record.final_status, CallStatus::Scam);
        assert_eq!(outcome.record.full_transcription, "hello send money now");
        assert_eq!(outcome.record.model_version, "table-v1");
        assert!(outcome.record.duration_secs >= 0.0);
        assert!(!f.store.contains("c1"));

        let stored = f.gateway.get_call_record("c1").unwrap().unwrap();
        assert_eq!(stored.user_feedback, Some(UserFeedback::Correct));
    }

    #[tokio::test]
    async fn test_last_chunk_can_disagree_with_live_context() {
        // The context as a whole would be Scam, the last chunk alone is Safe.
        let classifier: Arc<dyn Classifier> = Arc::new(Table(HashMap::from([(
            "send money now thanks bye",
            0.95,
        )])));
        let f = fixture(classifier, 0);
        f.store.append_chunk("c1", "send money now").unwrap();
        f.store.append_chunk("c1", "thanks bye").unwrap();

        let outcome = f.service.finalize("c1", None, None).await.unwrap();
        assert_eq!(outcome.record.final_status, CallStatus::Safe);
    }

    #[tokio::test]
    async fn test_session_without_chunks_is_unknown() {
        let f = fixture(scam_table(), 0);
        f.store.get_or_create("c1");

        let outcome = f
            .service
            .finalize("c1", Some("+15550100".to_string()), None)
            .await
            .unwrap();
        assert_eq!(outcome.record.final_status, CallStatus::Unknown);
        assert_eq!(outcome.record.caller_number.as_deref(), Some("+15550100"));
        assert_eq!(outcome.record.full_transcription, "");
    }

    #[tokio::test]
    async fn test_classifier_failure_at_finalize_is_unknown() {
        let f = fixture(Arc::new(Broken), 0);
        f.store.append_chunk("c1", "hello").unwrap();

        let outcome = f.service.finalize("c1", None, None).await.unwrap();
        assert_eq!(outcome.record.final_status, CallStatus::Unknown);
        assert_eq!(outcome.persistence, Persistence::Stored);
    }

    #[tokio::test]
    async fn test_finalize_is_exactly_once() {
        let f = fixture(scam_table(), 0);
        f.store.append_chunk("c1", "hello").unwrap();

        assert!(f.service.finalize("c1", None, None).await.is_ok());
        assert!(matches!(
            f.service.finalize("c1", None, None).await,
            Err(AppError::SessionNotFound(_))
        ));
        assert!(matches!(
            f.service.finalize("never-seen", None, None).await,
            Err(AppError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_late_chunk_cannot_overwrite_stored_call() {
        let f = fixture(scam_table(), 0);
        f.store.append_chunk("c1", "send money now").unwrap();
        let first = f
            .service
            .finalize("c1", None, Some(UserFeedback::Correct))
            .await
            .unwrap();

        // A chunk arriving after the save opens a fresh session under the same id.
        f.store.append_chunk("c1", "ok bye").unwrap();
        assert!(matches!(
            f.service.finalize("c1", None, None).await,
            Err(AppError::Conflict(_))
        ));

        let stored = f.gateway.get_call_record("c1").unwrap().unwrap();
        assert_eq!(stored, first.record);
        assert_eq!(stored.user_feedback, Some(UserFeedback::Correct));
        assert_eq!(stored.final_status, CallStatus::Scam);
        assert_eq!(f.gateway.calls.load(Ordering::SeqCst), 2);
        assert!(f.pending.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_transient_write_failure_is_retried() {
        let f = fixture(scam_table(), 2);
        f.store.append_chunk("c1", "hello").unwrap();

        let outcome = f.service.finalize("c1", None, None).await.unwrap();
        assert_eq!(outcome.persistence, Persistence::Stored);
        assert_eq!(f.gateway.calls.load(Ordering::SeqCst), 3);
        assert!(f.pending.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_exhausted_retries_queue_the_record() {
        let f = fixture(scam_table(), u32::MAX);
        f.store.append_chunk("c1", "send money now").unwrap();

        let outcome = f.service.finalize("c1", None, None).await.unwrap();
        assert_eq!(outcome.persistence, Persistence::Queued);
        assert!(f.gateway.get_call_record("c1").unwrap().is_none());

        let queued = f.pending.pending().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0], outcome.record);
    }

    #[test]
    fn test_backoff_doubles() {
        let retry = RetryPolicy {
            attempts: 4,
            initial_backoff: Duration::from_millis(100),
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(400));
    }
}
