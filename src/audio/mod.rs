//! # Audio Intake
//!
//! Audio arrives as base64-encoded chunks in a recognized container format
//! (mp3, wav, 3gp, mpeg, m4a, ogg, flac). This module validates a chunk and
//! settles its format before it is handed to the transcriber. No decoding or
//! resampling happens here; the transcriber receives the original bytes.

pub mod format;

pub use format::{resolve_format, AudioFormat};

use crate::error::{AppError, AppResult};
use base64::Engine;

/// Decode a base64 payload, rejecting malformed input as a validation error.
pub fn decode_base64(payload: &str) -> AppResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| AppError::ValidationError(format!("Invalid base64 audio: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64() {
        assert_eq!(decode_base64("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(decode_base64("  aGVsbG8=\n").unwrap(), b"hello");
        assert!(matches!(
            decode_base64("not base64!"),
            Err(AppError::ValidationError(_))
        ));
    }
}
