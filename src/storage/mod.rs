//! # Persistence
//!
//! Finalized calls and the model history live behind [`PersistenceGateway`].
//! The production implementation is SQLite ([`SqliteGateway`]); records that
//! cannot be written are parked in a [`PendingRecordQueue`] and replayed later.
//!
//! ## Tables:
//! - **call_records**: one row per finalized call, keyed by `call_id`
//! - **model_metadata**: append-only history of trained models

pub mod pending;
pub mod records;
pub mod sqlite;

pub use pending::{DrainReport, PendingRecordQueue};
pub use records::{CallRecord, ModelMetadata, NewModelMetadata, UserFeedback};
pub use sqlite::SqliteGateway;

use crate::error::AppResult;

pub trait PersistenceGateway: Send + Sync {
    /// Store a finalized call. Writing the same `call_id` again replaces the row.
    fn insert_call_record(&self, record: &CallRecord) -> AppResult<()>;

    fn get_call_record(&self, call_id: &str) -> AppResult<Option<CallRecord>>;

    /// Set the feedback of a stored call. Returns `false` if no such call exists.
    fn update_feedback(&self, call_id: &str, feedback: UserFeedback) -> AppResult<bool>;

    /// Every call that carries feedback, in insertion order.
    fn records_with_feedback(&self) -> AppResult<Vec<CallRecord>>;

    /// Append a model history row and return its id.
    fn append_model_metadata(&self, metadata: &NewModelMetadata) -> AppResult<i64>;

    /// The most recently appended model, if any.
    fn latest_model_metadata(&self) -> AppResult<Option<ModelMetadata>>;
}
