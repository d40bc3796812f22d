//! # Text Tokenization
//!
//! The context window is measured in tokens, not characters. Two tokenizers
//! are available:
//!
//! - **WhitespaceTokenizer**: splits on whitespace, joins with single spaces.
//!   No model files needed, used when `models.tokenizer_path` is not set.
//! - **HfTokenizer**: wraps a HuggingFace `tokenizer.json` so the window is
//!   counted in the same word pieces the classifier sees.
//!
//! Truncation goes through [`TextTokenizer::keep_last`]. For subword
//! vocabularies the kept text starts on a word boundary, so it re-tokenizes
//! to at most `n` tokens (fewer when the cut would have split a word).

use crate::error::{AppError, AppResult};
use std::path::Path;
use tokenizers::{Decoder, Encoding, Tokenizer};

/// Splits text into tokens and joins tokens back into text.
///
/// Implementations must be deterministic: the same input always yields the
/// same tokens.
pub trait TextTokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> AppResult<Vec<String>>;

    fn detokenize(&self, tokens: &[String]) -> AppResult<String>;

    /// The tail of `text` holding its last `n` tokens.
    fn keep_last(&self, text: &str, n: usize) -> AppResult<String> {
        let tokens = self.tokenize(text)?;
        let keep_from = tokens.len() - n.min(tokens.len());
        self.detokenize(&tokens[keep_from..])
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenizer;

impl TextTokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str) -> AppResult<Vec<String>> {
        Ok(text.split_whitespace().map(str::to_string).collect())
    }

    fn detokenize(&self, tokens: &[String]) -> AppResult<String> {
        Ok(tokens.join(" "))
    }
}

/// HuggingFace tokenizer adapter.
pub struct HfTokenizer {
    inner: Tokenizer,
}

impl HfTokenizer {
    /// Load a `tokenizer.json`.
    ///
    /// Truncation and padding are switched off: the context window does its
    /// own truncation and needs the full token count.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let mut inner = Tokenizer::from_file(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to load tokenizer {:?}: {}", path, e))
        })?;
        inner
            .with_truncation(None)
            .map_err(|e| AppError::ConfigError(format!("Failed to disable truncation: {}", e)))?;
        inner.with_padding(None);

        tracing::info!("Loaded context tokenizer from {:?}", path);
        Ok(Self { inner })
    }
}

impl HfTokenizer {
    fn encode(&self, text: &str) -> AppResult<Encoding> {
        self.inner
            .encode(text, false)
            .map_err(|e| AppError::Internal(format!("Tokenizer encode error: {}", e)))
    }
}

impl TextTokenizer for HfTokenizer {
    fn tokenize(&self, text: &str) -> AppResult<Vec<String>> {
        Ok(self.encode(text)?.get_tokens().to_vec())
    }

    fn detokenize(&self, tokens: &[String]) -> AppResult<String> {
        match self.inner.get_decoder() {
            Some(decoder) => decoder
                .decode(tokens.to_vec())
                .map_err(|e| AppError::Internal(format!("Tokenizer decode error: {}", e))),
            None => Ok(tokens.join(" ")),
        }
    }

    /// Slices `text` at the byte offset of the first kept token instead of
    /// decoding the pieces, which would leave a bare `##ing` at the front.
    fn keep_last(&self, text: &str, n: usize) -> AppResult<String> {
        let encoding = self.encode(text)?;
        let total = encoding.get_tokens().len();
        if total <= n {
            return Ok(text.to_string());
        }

        let words = encoding.get_word_ids();
        let mut start = total - n;
        // Skip the remaining pieces of a word cut in half.
        while start < total && words[start].is_some() && words[start] == words[start - 1] {
            start += 1;
        }
        if start == total {
            return Ok(String::new());
        }

        let (offset, _) = encoding.get_offsets()[start];
        Ok(text.get(offset..).unwrap_or_default().to_string())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::wordpiece_tokenizer;
    use super::*;

    #[test]
    fn test_whitespace_tokenizer_collapses_runs() {
        let tokenizer = WhitespaceTokenizer;
        let tokens = tokenizer.tokenize("  send   money\tnow ").unwrap();
        assert_eq!(tokens, vec!["send", "money", "now"]);
        assert_eq!(tokenizer.detokenize(&tokens).unwrap(), "send money now");
    }

    #[test]
    fn test_whitespace_tokenizer_empty_input() {
        let tokenizer = WhitespaceTokenizer;
        assert!(tokenizer.tokenize("   ").unwrap().is_empty());
        assert_eq!(tokenizer.detokenize(&[]).unwrap(), "");
    }

    #[test]
    fn test_missing_tokenizer_file_is_config_error() {
        let result = HfTokenizer::from_file("/nonexistent/tokenizer.json");
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_wordpiece_fixture_splits_words() {
        let dir = tempfile::tempdir().unwrap();
        let tokenizer = wordpiece_tokenizer(dir.path());
        assert_eq!(
            tokenizer.tokenize("sending gift cards").unwrap(),
            vec!["send", "##ing", "gift", "card", "##s"]
        );
        assert_eq!(
            tokenizer
                .detokenize(&tokenizer.tokenize("sending gift cards").unwrap())
                .unwrap(),
            "sending gift cards"
        );
    }

    #[test]
    fn test_keep_last_on_word_boundary_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let tokenizer = wordpiece_tokenizer(dir.path());

        let kept = tokenizer.keep_last("send money now sending cards", 4).unwrap();
        assert_eq!(kept, "sending cards");
        assert_eq!(tokenizer.tokenize(&kept).unwrap().len(), 4);
    }

    #[test]
    fn test_keep_last_never_starts_mid_word() {
        let dir = tempfile::tempdir().unwrap();
        let tokenizer = wordpiece_tokenizer(dir.path());

        // The newest 3 tokens are `##ing card ##s`; the split word is dropped.
        let kept = tokenizer.keep_last("send money now sending cards", 3).unwrap();
        assert_eq!(kept, "cards");
        assert_eq!(tokenizer.tokenize(&kept).unwrap(), vec!["card", "##s"]);
    }

    #[test]
    fn test_whitespace_keep_last() {
        let tokenizer = WhitespaceTokenizer;
        assert_eq!(tokenizer.keep_last("a b  c d", 2).unwrap(), "c d");
        assert_eq!(tokenizer.keep_last("a b", 5).unwrap(), "a b");
    }
}
