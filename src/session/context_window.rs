//! # Context Window
//!
//! Merges a newly transcribed chunk into a call's running context under a
//! token budget.
//!
//! ## Hysteresis:
//! When the merged text crosses `max_tokens`, the oldest tokens are dropped
//! until `retain_tokens` remain (not `max_tokens`). With a subword tokenizer
//! the cut moves forward to the next word boundary, so up to one word's
//! pieces fewer may remain; never more. The window then has
//! `max_tokens - retain_tokens` tokens of headroom, so several further chunks
//! fit before the next truncation.
//!
//! ```text
//! max = 512, retain = 412
//!
//!   500 tokens + 20 new  = 520 > 512  -> keep newest 412
//!   412 tokens + 20 new  = 432        -> untouched
//!   ...                               -> untouched until > 512 again
//! ```

use crate::error::AppResult;
use crate::tokenize::TextTokenizer;

/// Token limits applied by [`merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimits {
    pub max_tokens: usize,
    pub retain_tokens: usize,
}

impl WindowLimits {
    pub fn new(max_tokens: usize, retain_tokens: usize) -> Self {
        Self {
            max_tokens,
            retain_tokens,
        }
    }
}

/// Merge `new_text` into `existing` and bound the result.
///
/// Returns the untruncated `existing + " " + new_text` while it fits in
/// `max_tokens`; otherwise the tail holding the newest `retain_tokens` tokens.
/// An empty `existing` contributes no separator.
pub fn merge(
    tokenizer: &dyn TextTokenizer,
    existing: &str,
    new_text: &str,
    limits: WindowLimits,
) -> AppResult<String> {
    let merged = if existing.is_empty() {
        new_text.to_string()
    } else {
        format!("{} {}", existing, new_text)
    };

    let tokens = tokenizer.tokenize(&merged)?;
    if tokens.len() <= limits.max_tokens {
        return Ok(merged);
    }

    tracing::debug!(
        total_tokens = tokens.len(),
        retain_tokens = limits.retain_tokens,
        "Context window truncated"
    );
    tokenizer.keep_last(&merged, limits.retain_tokens)
}

/// Token count of `text` under `tokenizer`.
pub fn token_count(tokenizer: &dyn TextTokenizer, text: &str) -> AppResult<usize> {
    Ok(tokenizer.tokenize(text)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenize::test_support::wordpiece_tokenizer;
    use crate::tokenize::WhitespaceTokenizer;

    fn words(prefix: &str, n: usize) -> String {
        (0..n)
            .map(|i| format!("{}{}", prefix, i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_merge_without_truncation_is_space_join() {
        let tok = WhitespaceTokenizer;
        let limits = WindowLimits::new(10, 6);

        let ctx = merge(&tok, "", "hello", limits).unwrap();
        assert_eq!(ctx, "hello");

        let ctx = merge(&tok, &ctx, "send money now", limits).unwrap();
        assert_eq!(ctx, "hello send money now");
    }

    #[test]
    fn test_merge_at_exact_ceiling_keeps_everything() {
        let tok = WhitespaceTokenizer;
        let limits = WindowLimits::new(10, 6);

        let ctx = merge(&tok, &words("a", 7), &words("b", 3), limits).unwrap();
        assert_eq!(token_count(&tok, &ctx).unwrap(), 10);
        assert!(ctx.starts_with("a0 "));
    }

    #[test]
    fn test_overflow_truncates_to_retain_not_max() {
        let tok = WhitespaceTokenizer;
        let limits = WindowLimits::new(10, 6);

        let ctx = merge(&tok, &words("a", 9), &words("b", 2), limits).unwrap();
        assert_eq!(token_count(&tok, &ctx).unwrap(), 6);
        // Newest tokens survive, oldest are dropped.
        assert_eq!(ctx, "a5 a6 a7 a8 b0 b1");
    }

    #[test]
    fn test_hysteresis_defers_next_truncation() {
        let tok = WhitespaceTokenizer;
        let limits = WindowLimits::new(10, 6);

        let mut ctx = merge(&tok, &words("a", 9), &words("b", 2), limits).unwrap();
        assert_eq!(token_count(&tok, &ctx).unwrap(), 6);

        // 6 + 2 = 8, 8 + 2 = 10: both stay untruncated.
        ctx = merge(&tok, &ctx, "c0 c1", limits).unwrap();
        assert_eq!(token_count(&tok, &ctx).unwrap(), 8);
        ctx = merge(&tok, &ctx, "d0 d1", limits).unwrap();
        assert_eq!(token_count(&tok, &ctx).unwrap(), 10);

        // 10 + 1 = 11 crosses the ceiling again.
        ctx = merge(&tok, &ctx, "e0", limits).unwrap();
        assert_eq!(token_count(&tok, &ctx).unwrap(), 6);
        assert!(ctx.ends_with("d1 e0"));
    }

    #[test]
    fn test_single_huge_chunk_is_cut_to_retain() {
        let tok = WhitespaceTokenizer;
        let limits = WindowLimits::new(512, 412);

        let ctx = merge(&tok, "", &words("w", 2000), limits).unwrap();
        assert_eq!(token_count(&tok, &ctx).unwrap(), 412);
        assert!(ctx.ends_with("w1999"));
    }

    #[test]
    fn test_subword_truncation_stays_within_retain() {
        let dir = tempfile::tempdir().unwrap();
        let tok = wordpiece_tokenizer(dir.path());

        // 7 pieces > 5; retain 4 lands on the start of "sending".
        let ctx = merge(&tok, "send money now", "sending cards", WindowLimits::new(5, 4)).unwrap();
        assert_eq!(ctx, "sending cards");
        assert_eq!(token_count(&tok, &ctx).unwrap(), 4);

        // Retain 3 would start at `##ing`; the window starts at "cards" instead.
        let ctx = merge(&tok, "send money now", "sending cards", WindowLimits::new(5, 3)).unwrap();
        assert_eq!(ctx, "cards");
        assert!(token_count(&tok, &ctx).unwrap() <= 3);
    }
}
