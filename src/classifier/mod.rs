//! # Scam Classifier
//!
//! The classifier is an explicitly constructed capability object: it is built
//! once at startup and handed to the services that score text. Nothing in the
//! crate reaches for a global model.
//!
//! ## Contract:
//! `score(text)` returns the probability that `text` comes from a scam call,
//! a float in `[0, 1]`. Anything else is a [`AppError::ClassificationError`].
//!
//! ## Backends:
//! - **distilbert**: fine-tuned DistilBERT sequence classifier run with Candle
//! - **lexicon**: weighted scam-phrase heuristic, no model files needed

pub mod device;
pub mod distilbert;
pub mod lexicon;

pub use distilbert::DistilBertClassifier;
pub use lexicon::LexiconClassifier;

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lower bound of the Scam band (inclusive).
pub const SCAM_THRESHOLD: f64 = 0.8;
/// Lower bound of the Suspicious band (inclusive).
pub const SUSPICIOUS_THRESHOLD: f64 = 0.4;

/// Scores text for scam likelihood.
pub trait Classifier: Send + Sync {
    /// Probability in `[0, 1]` that `text` is part of a scam call.
    fn score(&self, text: &str) -> AppResult<f64>;

    /// Identifier of the model, written into every call record.
    fn model_version(&self) -> &str;
}

/// Risk band derived from a probability, or `Unknown` when nothing was scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallStatus {
    Scam,
    Suspicious,
    Safe,
    Unknown,
}

impl CallStatus {
    /// Band a probability. Each band includes its lower bound.
    pub fn from_probability(probability: f64) -> Self {
        if probability >= SCAM_THRESHOLD {
            CallStatus::Scam
        } else if probability >= SUSPICIOUS_THRESHOLD {
            CallStatus::Suspicious
        } else {
            CallStatus::Safe
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Scam => "Scam",
            CallStatus::Suspicious => "Suspicious",
            CallStatus::Safe => "Safe",
            CallStatus::Unknown => "Unknown",
        }
    }

    /// Display colour the mobile client uses for the band.
    pub fn color(&self) -> &'static str {
        match self {
            CallStatus::Scam => "red",
            CallStatus::Suspicious => "yellow",
            CallStatus::Safe => "green",
            CallStatus::Unknown => "grey",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Scam" => Ok(CallStatus::Scam),
            "Suspicious" => Ok(CallStatus::Suspicious),
            "Safe" => Ok(CallStatus::Safe),
            "Unknown" => Ok(CallStatus::Unknown),
            other => Err(AppError::PersistenceError(format!("Unknown call status: {}", other))),
        }
    }
}

/// Score `text` and reject values outside `[0, 1]`.
pub fn checked_score(classifier: &dyn Classifier, text: &str) -> AppResult<f64> {
    let probability = classifier.score(text)?;
    if !(0.0..=1.0).contains(&probability) {
        return Err(AppError::ClassificationError(format!(
            "Classifier returned out-of-range probability: {}",
            probability
        )));
    }
    Ok(probability)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f64);

    impl Classifier for Fixed {
        fn score(&self, _text: &str) -> AppResult<f64> {
            Ok(self.0)
        }

        fn model_version(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn test_band_boundaries() {
        assert_eq!(CallStatus::from_probability(0.79), CallStatus::Suspicious);
        assert_eq!(CallStatus::from_probability(0.80), CallStatus::Scam);
        assert_eq!(CallStatus::from_probability(0.39), CallStatus::Safe);
        assert_eq!(CallStatus::from_probability(0.40), CallStatus::Suspicious);
        assert_eq!(CallStatus::from_probability(0.0), CallStatus::Safe);
        assert_eq!(CallStatus::from_probability(1.0), CallStatus::Scam);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            CallStatus::Scam,
            CallStatus::Suspicious,
            CallStatus::Safe,
            CallStatus::Unknown,
        ] {
            assert_eq!(status.as_str().parse::<CallStatus>().unwrap(), status);
        }
        assert!("scam".parse::<CallStatus>().is_err());
    }

    #[test]
    fn test_checked_score_rejects_out_of_range() {
        assert!(checked_score(&Fixed(0.5), "x").is_ok());
        assert!(matches!(
            checked_score(&Fixed(1.5), "x"),
            Err(AppError::ClassificationError(_))
        ));
        assert!(matches!(
            checked_score(&Fixed(f64::NAN), "x"),
            Err(AppError::ClassificationError(_))
        ));
    }
}
