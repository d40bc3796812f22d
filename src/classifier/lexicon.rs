//! Keyword heuristic classifier.
//!
//! Sums the weights of known scam phrases found in the text and squashes the
//! total through a logistic curve. Useful in development when no fine-tuned
//! model is available, and fully deterministic.

use crate::classifier::Classifier;
use crate::error::AppResult;

/// Phrase weights. Phrases are matched on lowercase text.
const DEFAULT_PHRASES: &[(&str, f64)] = &[
    // Payment pressure
    ("send money", 2.5),
    ("wire transfer", 2.0),
    ("gift card", 2.5),
    ("bitcoin", 1.5),
    ("western union", 2.0),
    ("processing fee", 1.5),
    // Confidential data
    ("social security", 2.0),
    ("bank account", 1.5),
    ("verification code", 2.0),
    ("password", 1.5),
    ("pin number", 1.5),
    ("credit card", 1.0),
    // Urgency and threats
    ("immediately", 1.0),
    ("right now", 1.0),
    ("arrest", 1.5),
    ("warrant", 1.5),
    ("suspended", 1.0),
    ("final notice", 1.0),
    // Unsolicited offers
    ("you have won", 2.0),
    ("lottery", 1.5),
    ("prize", 1.0),
    ("refund", 0.5),
];

/// Logistic offset: text without any phrase scores `sigmoid(-2) ≈ 0.12`.
const BIAS: f64 = -2.0;

pub struct LexiconClassifier {
    phrases: Vec<(String, f64)>,
    bias: f64,
}

impl LexiconClassifier {
    pub fn new() -> Self {
        Self {
            phrases: DEFAULT_PHRASES
                .iter()
                .map(|(phrase, weight)| (phrase.to_string(), *weight))
                .collect(),
            bias: BIAS,
        }
    }

    fn evidence(&self, text: &str) -> f64 {
        let lower = text.to_lowercase();
        self.phrases
            .iter()
            .filter(|(phrase, _)| lower.contains(phrase.as_str()))
            .map(|(_, weight)| weight)
            .sum()
    }
}

impl Default for LexiconClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for LexiconClassifier {
    fn score(&self, text: &str) -> AppResult<f64> {
        let logit = self.bias + self.evidence(text);
        Ok(1.0 / (1.0 + (-logit).exp()))
    }

    fn model_version(&self) -> &str {
        "lexicon-v1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::CallStatus;

    #[test]
    fn test_plain_conversation_is_safe() {
        let classifier = LexiconClassifier::new();
        let p = classifier.score("hello, are we still on for dinner?").unwrap();
        assert_eq!(CallStatus::from_probability(p), CallStatus::Safe);
    }

    #[test]
    fn test_payment_pressure_is_scam() {
        let classifier = LexiconClassifier::new();
        // 2.5 + 2.5 + 1.0 - 2.0 = 4.0 -> ~0.98
        let p = classifier
            .score("Send money with a gift card immediately")
            .unwrap();
        assert_eq!(CallStatus::from_probability(p), CallStatus::Scam);
    }

    #[test]
    fn test_single_phrase_is_suspicious() {
        let classifier = LexiconClassifier::new();
        // 2.5 - 2.0 = 0.5 -> ~0.62
        let p = classifier.score("please send money").unwrap();
        assert_eq!(CallStatus::from_probability(p), CallStatus::Suspicious);
    }
}
