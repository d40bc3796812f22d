//! Turns user feedback on finalized calls into binary training labels.
//!
//! | feedback    | final status | label |
//! |-------------|--------------|-------|
//! | correct     | Scam         | 1     |
//! | correct     | other        | 0     |
//! | incorrect   | Scam         | 0     |
//! | incorrect   | other        | 1     |
//! | none / null | any          | skip  |
//!
//! "other" includes `Suspicious`, `Safe` and `Unknown`: the model only knows
//! scam versus not-scam.

use crate::classifier::CallStatus;
use crate::storage::{CallRecord, UserFeedback};
use crate::training::dataset::LabeledExample;

pub const SCAM_LABEL: u8 = 1;
pub const NOT_SCAM_LABEL: u8 = 0;

/// Label for one record, or `None` if its feedback carries no signal.
pub fn label_for(record: &CallRecord) -> Option<u8> {
    let predicted_scam = record.final_status == CallStatus::Scam;
    match record.user_feedback? {
        UserFeedback::Correct => Some(if predicted_scam { SCAM_LABEL } else { NOT_SCAM_LABEL }),
        UserFeedback::Incorrect => Some(if predicted_scam { NOT_SCAM_LABEL } else { SCAM_LABEL }),
        UserFeedback::NoFeedback => None,
    }
}

pub fn derive_labels(records: &[CallRecord]) -> Vec<LabeledExample> {
    records
        .iter()
        .filter_map(|record| {
            label_for(record).map(|label| LabeledExample {
                text: record.full_transcription.clone(),
                label,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(text: &str, status: CallStatus, feedback: Option<UserFeedback>) -> CallRecord {
        let now = Utc::now();
        CallRecord {
            call_id: text.to_string(),
            start_time: now,
            end_time: now,
            duration_secs: 0.0,
            caller_number: None,
            full_transcription: text.to_string(),
            user_feedback: feedback,
            final_status: status,
            model_version: "test".to_string(),
        }
    }

    #[test]
    fn test_label_table() {
        use CallStatus::*;
        use UserFeedback::*;

        assert_eq!(label_for(&record("a", Scam, Some(Correct))), Some(1));
        assert_eq!(label_for(&record("a", Safe, Some(Correct))), Some(0));
        assert_eq!(label_for(&record("a", Suspicious, Some(Correct))), Some(0));
        assert_eq!(label_for(&record("a", Scam, Some(Incorrect))), Some(0));
        assert_eq!(label_for(&record("a", Safe, Some(Incorrect))), Some(1));
        assert_eq!(label_for(&record("a", Suspicious, Some(Incorrect))), Some(1));
        assert_eq!(label_for(&record("a", Unknown, Some(Incorrect))), Some(1));
        assert_eq!(label_for(&record("a", Scam, Some(NoFeedback))), None);
        assert_eq!(label_for(&record("a", Scam, None)), None);
    }

    #[test]
    fn test_derive_labels_skips_records_without_signal() {
        let records = vec![
            record("pay now", CallStatus::Scam, Some(UserFeedback::Correct)),
            record("hi mum", CallStatus::Scam, Some(UserFeedback::Incorrect)),
            record("whatever", CallStatus::Safe, Some(UserFeedback::NoFeedback)),
            record("unlabeled", CallStatus::Safe, None),
        ];

        let labeled = derive_labels(&records);
        assert_eq!(
            labeled,
            vec![
                LabeledExample { text: "pay now".to_string(), label: 1 },
                LabeledExample { text: "hi mum".to_string(), label: 0 },
            ]
        );
    }
}
