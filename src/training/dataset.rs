//! # Training Corpus Assembly
//!
//! The corpus is a CSV file with a `text,label` header, the layout the
//! training scripts load. Assembly appends feedback-derived examples to the
//! base corpus and drops exact-text duplicates, keeping the first occurrence. Because base
//! rows come first, a base label always wins over a derived one for the same
//! text.

use crate::error::{AppError, AppResult};
use crate::storage::PersistenceGateway;
use crate::training::labeler::derive_labels;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub text: String,
    pub label: u8,
}

/// Counts from one assembly run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AssemblyReport {
    pub base_rows: usize,
    pub derived_rows: usize,
    pub duplicates_dropped: usize,
    pub final_rows: usize,
}

/// Concatenate `base` then `derived`, keeping the first example per text.
pub fn merge(
    base: Vec<LabeledExample>,
    derived: Vec<LabeledExample>,
) -> (Vec<LabeledExample>, AssemblyReport) {
    let base_rows = base.len();
    let derived_rows = derived.len();

    let mut seen = HashSet::new();
    let corpus: Vec<LabeledExample> = base
        .into_iter()
        .chain(derived)
        .filter(|example| seen.insert(example.text.clone()))
        .collect();

    let report = AssemblyReport {
        base_rows,
        derived_rows,
        duplicates_dropped: base_rows + derived_rows - corpus.len(),
        final_rows: corpus.len(),
    };
    (corpus, report)
}

/// Read a `text,label` CSV corpus. Extra columns are ignored.
pub fn read_corpus(path: impl AsRef<Path>) -> AppResult<Vec<LabeledExample>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        AppError::ConfigError(format!("Cannot open corpus {}: {}", path.display(), e))
    })?;

    let mut reader = csv::Reader::from_reader(file);
    let mut examples = Vec::new();
    for row in reader.deserialize::<LabeledExample>() {
        let example =
            row.map_err(|e| AppError::ValidationError(format!("{}: {}", path.display(), e)))?;
        if example.label > 1 {
            return Err(AppError::ValidationError(format!(
                "{} row {}: label must be 0 or 1, got {}",
                path.display(),
                examples.len() + 1,
                example.label
            )));
        }
        examples.push(example);
    }

    if examples.is_empty() {
        return Err(AppError::ValidationError(format!(
            "Corpus {} is empty",
            path.display()
        )));
    }
    Ok(examples)
}

/// Write `examples` as CSV with a `text,label` header.
pub fn write_corpus(path: impl AsRef<Path>, examples: &[LabeledExample]) -> AppResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    for example in examples {
        writer
            .serialize(example)
            .map_err(|e| AppError::Internal(format!("Cannot write {}: {}", path.display(), e)))?;
    }
    writer.flush()?;
    Ok(())
}

/// Build the training corpus from `base_path` plus every labeled call in
/// `gateway`, and write it to `output_path`.
pub fn assemble(
    gateway: &dyn PersistenceGateway,
    base_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
) -> AppResult<AssemblyReport> {
    let base = read_corpus(&base_path)?;
    let derived = derive_labels(&gateway.records_with_feedback()?);
    let (corpus, report) = merge(base, derived);
    write_corpus(&output_path, &corpus)?;

    info!(
        base_rows = report.base_rows,
        derived_rows = report.derived_rows,
        duplicates_dropped = report.duplicates_dropped,
        final_rows = report.final_rows,
        "Training corpus written to {}",
        output_path.as_ref().display()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::CallStatus;
    use crate::storage::{CallRecord, SqliteGateway, UserFeedback};
    use chrono::Utc;

    fn ex(text: &str, label: u8) -> LabeledExample {
        LabeledExample {
            text: text.to_string(),
            label,
        }
    }

    #[test]
    fn test_merge_keeps_first_occurrence() {
        let (corpus, report) = merge(vec![ex("a", 1)], vec![ex("a", 0), ex("b", 1)]);

        assert_eq!(corpus, vec![ex("a", 1), ex("b", 1)]);
        assert_eq!(
            report,
            AssemblyReport {
                base_rows: 1,
                derived_rows: 2,
                duplicates_dropped: 1,
                final_rows: 2,
            }
        );
    }

    #[test]
    fn test_merge_dedups_within_base_and_derived() {
        let (corpus, _) = merge(
            vec![ex("x", 0), ex("x", 1)],
            vec![ex("y", 1), ex("y", 0), ex("X", 1)],
        );
        // Dedup is on exact text: "X" is not "x".
        assert_eq!(corpus, vec![ex("x", 0), ex("y", 1), ex("X", 1)]);
    }

    #[test]
    fn test_corpus_round_trip_with_quoted_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.csv");
        let examples = vec![
            ex("pay now, or else", 1),
            ex("line one\nline two", 0),
            ex("he said \"hi\"", 0),
        ];
        write_corpus(&path, &examples).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("text,label\n"));
        assert_eq!(read_corpus(&path).unwrap(), examples);
    }

    #[test]
    fn test_reads_csv_with_extra_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.csv");
        std::fs::write(&path, "id,text,label\n1,\"urgent, call back\",1\n2,see you,0\n").unwrap();

        assert_eq!(
            read_corpus(&path).unwrap(),
            vec![ex("urgent, call back", 1), ex("see you", 0)]
        );
    }

    #[test]
    fn test_corpus_validation() {
        let dir = tempfile::tempdir().unwrap();

        let bad_label = dir.path().join("bad.csv");
        std::fs::write(&bad_label, "text,label\na,2\n").unwrap();
        assert!(matches!(read_corpus(&bad_label), Err(AppError::ValidationError(_))));

        let no_label = dir.path().join("no_label.csv");
        std::fs::write(&no_label, "text\na\n").unwrap();
        assert!(matches!(read_corpus(&no_label), Err(AppError::ValidationError(_))));

        let empty = dir.path().join("empty.csv");
        std::fs::write(&empty, "text,label\n").unwrap();
        assert!(matches!(read_corpus(&empty), Err(AppError::ValidationError(_))));

        assert!(matches!(
            read_corpus(dir.path().join("missing.csv")),
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    fn test_assemble_from_database() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.csv");
        let out = dir.path().join("out").join("merged.csv");
        write_corpus(&base, &[ex("send money now", 1), ex("hello", 0)]).unwrap();

        let db = SqliteGateway::open_in_memory().unwrap();
        let now = Utc::now();
        for (id, text, status, feedback) in [
            ("c1", "send money now", CallStatus::Safe, UserFeedback::Incorrect),
            ("c2", "your warrant", CallStatus::Scam, UserFeedback::Correct),
            ("c3", "see you", CallStatus::Safe, UserFeedback::NoFeedback),
        ] {
            db.insert_call_record(&CallRecord {
                call_id: id.to_string(),
                start_time: now,
                end_time: now,
                duration_secs: 1.0,
                caller_number: None,
                full_transcription: text.to_string(),
                user_feedback: Some(feedback),
                final_status: status,
                model_version: "test".to_string(),
            })
            .unwrap();
        }

        let report = assemble(&db, &base, &out).unwrap();
        assert_eq!(report.derived_rows, 2);
        assert_eq!(report.duplicates_dropped, 1);
        assert_eq!(
            read_corpus(&out).unwrap(),
            vec![ex("send money now", 1), ex("hello", 0), ex("your warrant", 1)]
        );
    }
}
