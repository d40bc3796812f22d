//! SQLite-backed [`PersistenceGateway`].

use crate::classifier::CallStatus;
use crate::error::{AppError, AppResult};
use crate::storage::{CallRecord, ModelMetadata, NewModelMetadata, PersistenceGateway, UserFeedback};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS call_records (
        call_id TEXT PRIMARY KEY,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        duration REAL NOT NULL,
        caller_number TEXT,
        full_transcription TEXT NOT NULL,
        user_feedback TEXT,
        final_status TEXT NOT NULL,
        model_version_used TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS model_metadata (
        model_id INTEGER PRIMARY KEY AUTOINCREMENT,
        model_name TEXT NOT NULL,
        training_date TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        dataset_version TEXT NOT NULL,
        accuracy REAL,
        training_epochs INTEGER NOT NULL,
        number_labels INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_call_id ON call_records(call_id);
";

const CALL_COLUMNS: &str = "call_id, start_time, end_time, duration, caller_number, \
     full_transcription, user_feedback, final_status, model_version_used";

pub struct SqliteGateway {
    conn: Mutex<Connection>,
}

impl SqliteGateway {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!("Opened call database at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::PersistenceError("Database connection lock poisoned".to_string()))
    }
}

fn call_from_row(row: &Row<'_>) -> rusqlite::Result<(CallRecord, Option<String>, String)> {
    let feedback: Option<String> = row.get(6)?;
    let status: String = row.get(7)?;
    let record = CallRecord {
        call_id: row.get(0)?,
        start_time: row.get(1)?,
        end_time: row.get(2)?,
        duration_secs: row.get(3)?,
        caller_number: row.get(4)?,
        full_transcription: row.get(5)?,
        user_feedback: None,
        final_status: CallStatus::Unknown,
        model_version: row.get(8)?,
    };
    Ok((record, feedback, status))
}

/// Apply the text columns that need parsing. Unrecognized feedback is dropped
/// with a warning so one bad row cannot poison reads.
fn finish_record(
    (mut record, feedback, status): (CallRecord, Option<String>, String),
) -> AppResult<CallRecord> {
    record.final_status = status.parse()?;
    record.user_feedback = match feedback {
        Some(value) => match value.parse::<UserFeedback>() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                warn!(call_id = %record.call_id, "Ignoring unrecognized feedback '{}'", value);
                None
            }
        },
        None => None,
    };
    Ok(record)
}

/// Equal in everything but feedback, which may have been set after the first
/// write landed.
fn same_call(stored: &CallRecord, incoming: &CallRecord) -> bool {
    stored.call_id == incoming.call_id
        && stored.start_time == incoming.start_time
        && stored.end_time == incoming.end_time
        && stored.duration_secs == incoming.duration_secs
        && stored.caller_number == incoming.caller_number
        && stored.full_transcription == incoming.full_transcription
        && stored.final_status == incoming.final_status
        && stored.model_version == incoming.model_version
}

impl PersistenceGateway for SqliteGateway {
    fn insert_call_record(&self, record: &CallRecord) -> AppResult<()> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO call_records ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(call_id) DO NOTHING",
                CALL_COLUMNS
            ),
            params![
                record.call_id,
                record.start_time,
                record.end_time,
                record.duration_secs,
                record.caller_number,
                record.full_transcription,
                record.user_feedback.map(|f| f.as_str()),
                record.final_status.as_str(),
                record.model_version,
            ],
        )?;
        if inserted > 0 {
            return Ok(());
        }

        // The row exists already: a replay of the same record is fine, anything
        // else would overwrite a finalized call.
        let stored = conn
            .query_row(
                &format!("SELECT {} FROM call_records WHERE call_id = ?1", CALL_COLUMNS),
                [&record.call_id],
                call_from_row,
            )
            .optional()?
            .map(finish_record)
            .transpose()?;
        match stored {
            Some(stored) if same_call(&stored, record) => Ok(()),
            _ => Err(AppError::Conflict(format!(
                "Call {} is already stored with different data",
                record.call_id
            ))),
        }
    }

    fn get_call_record(&self, call_id: &str) -> AppResult<Option<CallRecord>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM call_records WHERE call_id = ?1", CALL_COLUMNS),
                [call_id],
                call_from_row,
            )
            .optional()?;
        raw.map(finish_record).transpose()
    }

    fn update_feedback(&self, call_id: &str, feedback: UserFeedback) -> AppResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE call_records SET user_feedback = ?1 WHERE call_id = ?2",
            params![feedback.as_str(), call_id],
        )?;
        Ok(changed > 0)
    }

    fn records_with_feedback(&self) -> AppResult<Vec<CallRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM call_records WHERE user_feedback IS NOT NULL ORDER BY rowid",
            CALL_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], call_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(finish_record).collect()
    }

    fn append_model_metadata(&self, metadata: &NewModelMetadata) -> AppResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO model_metadata
                 (model_name, training_date, dataset_version, accuracy, training_epochs, number_labels)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                metadata.model_name,
                Utc::now().to_rfc3339(),
                metadata.dataset_version,
                metadata.accuracy,
                metadata.training_epochs,
                metadata.number_labels,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn latest_model_metadata(&self) -> AppResult<Option<ModelMetadata>> {
        let conn = self.conn()?;
        let metadata = conn
            .query_row(
                "SELECT model_id, model_name, training_date, dataset_version, accuracy,
                        training_epochs, number_labels
                 FROM model_metadata ORDER BY model_id DESC LIMIT 1",
                [],
                |row| {
                    Ok(ModelMetadata {
                        model_id: row.get(0)?,
                        model_name: row.get(1)?,
                        training_date: row.get(2)?,
                        dataset_version: row.get(3)?,
                        accuracy: row.get(4)?,
                        training_epochs: row.get(5)?,
                        number_labels: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(metadata)
    }
}
