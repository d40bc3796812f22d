//! Persistent record types.

use crate::classifier::CallStatus;
use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The user's verdict on a finalized call's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserFeedback {
    /// The status was right.
    Correct,
    /// The status was wrong.
    Incorrect,
    /// The user declined to say.
    #[serde(rename = "none")]
    NoFeedback,
}

impl UserFeedback {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserFeedback::Correct => "correct",
            UserFeedback::Incorrect => "incorrect",
            UserFeedback::NoFeedback => "none",
        }
    }
}

impl FromStr for UserFeedback {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "correct" => Ok(UserFeedback::Correct),
            "incorrect" => Ok(UserFeedback::Incorrect),
            "none" => Ok(UserFeedback::NoFeedback),
            other => Err(AppError::ValidationError(format!(
                "Invalid feedback '{}': expected correct, incorrect or none",
                other
            ))),
        }
    }
}

/// One finalized call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Seconds between `start_time` and `end_time`.
    pub duration_secs: f64,
    pub caller_number: Option<String>,
    pub full_transcription: String,
    pub user_feedback: Option<UserFeedback>,
    pub final_status: CallStatus,
    pub model_version: String,
}

/// A row of the model history table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_id: i64,
    pub model_name: String,
    pub training_date: String,
    pub dataset_version: String,
    pub accuracy: Option<f64>,
    pub training_epochs: u32,
    pub number_labels: u32,
}

/// Metadata for a model that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewModelMetadata {
    pub model_name: String,
    pub dataset_version: String,
    pub accuracy: Option<f64>,
    pub training_epochs: u32,
    pub number_labels: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_parsing() {
        assert_eq!("correct".parse::<UserFeedback>().unwrap(), UserFeedback::Correct);
        assert_eq!("Incorrect".parse::<UserFeedback>().unwrap(), UserFeedback::Incorrect);
        assert_eq!("none".parse::<UserFeedback>().unwrap(), UserFeedback::NoFeedback);
        assert!(matches!(
            "maybe".parse::<UserFeedback>(),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_feedback_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&UserFeedback::NoFeedback).unwrap(),
            "\"none\""
        );
        assert_eq!(
            serde_json::from_str::<UserFeedback>("\"incorrect\"").unwrap(),
            UserFeedback::Incorrect
        );
    }
}
