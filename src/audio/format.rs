//! Container format detection for uploaded audio chunks.
//!
//! The client may declare a format; otherwise it is sniffed from the leading
//! bytes. Either way the result must be on the configured allow-list.

use crate::error::{AppError, AppResult};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Wav,
    #[serde(rename = "3gp")]
    ThreeGp,
    Mpeg,
    M4a,
    Ogg,
    Flac,
}

impl AudioFormat {
    /// File extension, also the name used in config and requests.
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::ThreeGp => "3gp",
            AudioFormat::Mpeg => "mpeg",
            AudioFormat::M4a => "m4a",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Flac => "flac",
        }
    }

    /// Guess the format from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            // RIFF chunk size excludes the 8-byte header.
            let riff_size = LittleEndian::read_u32(&bytes[4..8]);
            return (riff_size >= 4).then_some(AudioFormat::Wav);
        }
        if bytes.starts_with(b"fLaC") {
            return Some(AudioFormat::Flac);
        }
        if bytes.starts_with(b"OggS") {
            return Some(AudioFormat::Ogg);
        }
        if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
            let box_size = BigEndian::read_u32(&bytes[0..4]);
            if box_size < 12 {
                return None;
            }
            let brand = &bytes[8..12];
            return if brand.starts_with(b"3gp") || brand.starts_with(b"3g2") {
                Some(AudioFormat::ThreeGp)
            } else if brand == b"M4A " || brand == b"M4B " {
                Some(AudioFormat::M4a)
            } else {
                None
            };
        }
        if bytes.len() >= 4 && BigEndian::read_u32(&bytes[0..4]) == 0x0000_01BA {
            return Some(AudioFormat::Mpeg);
        }
        if bytes.starts_with(b"ID3") {
            return Some(AudioFormat::Mp3);
        }
        // Bare MPEG audio frame sync: 11 set bits.
        if bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0 {
            return Some(AudioFormat::Mp3);
        }
        None
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "wav" => Ok(AudioFormat::Wav),
            "3gp" => Ok(AudioFormat::ThreeGp),
            "mpeg" => Ok(AudioFormat::Mpeg),
            "m4a" => Ok(AudioFormat::M4a),
            "ogg" => Ok(AudioFormat::Ogg),
            "flac" => Ok(AudioFormat::Flac),
            other => Err(AppError::ValidationError(format!(
                "Unsupported audio format: {}",
                other
            ))),
        }
    }
}

/// Validate a decoded chunk and settle its format.
///
/// The declared format wins over sniffing. Empty or oversized chunks, unknown
/// formats and formats missing from `allowed` are validation errors.
pub fn resolve_format(
    bytes: &[u8],
    declared: Option<&str>,
    allowed: &[String],
    max_bytes: usize,
) -> AppResult<AudioFormat> {
    if bytes.is_empty() {
        return Err(AppError::ValidationError("Audio chunk is empty".to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(AppError::ValidationError(format!(
            "Audio chunk is {} bytes, limit is {}",
            bytes.len(),
            max_bytes
        )));
    }

    let format = match declared {
        Some(name) if !name.trim().is_empty() => name.parse::<AudioFormat>()?,
        _ => AudioFormat::sniff(bytes).ok_or_else(|| {
            AppError::ValidationError("Could not determine audio format".to_string())
        })?,
    };

    if !allowed
        .iter()
        .any(|name| name.eq_ignore_ascii_case(format.extension()))
    {
        return Err(AppError::ValidationError(format!(
            "Audio format {} is not allowed",
            format
        )));
    }
    Ok(format)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_formats() -> Vec<String> {
        ["mp3", "wav", "3gp", "mpeg", "m4a", "ogg", "flac"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn wav_header() -> Vec<u8> {
        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&36u32.to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes
    }

    fn ftyp(brand: &[u8; 4]) -> Vec<u8> {
        let mut bytes = 20u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"ftyp");
        bytes.extend_from_slice(brand);
        bytes.extend_from_slice(&[0; 8]);
        bytes
    }

    #[test]
    fn test_sniff_known_containers() {
        assert_eq!(AudioFormat::sniff(&wav_header()), Some(AudioFormat::Wav));
        assert_eq!(AudioFormat::sniff(b"fLaC\0\0\0\x22"), Some(AudioFormat::Flac));
        assert_eq!(AudioFormat::sniff(b"OggS\0\x02"), Some(AudioFormat::Ogg));
        assert_eq!(AudioFormat::sniff(b"ID3\x04\0"), Some(AudioFormat::Mp3));
        assert_eq!(AudioFormat::sniff(&[0xFF, 0xFB, 0x90, 0x00]), Some(AudioFormat::Mp3));
        assert_eq!(AudioFormat::sniff(&[0x00, 0x00, 0x01, 0xBA, 0x44]), Some(AudioFormat::Mpeg));
        assert_eq!(AudioFormat::sniff(&ftyp(b"M4A ")), Some(AudioFormat::M4a));
        assert_eq!(AudioFormat::sniff(&ftyp(b"3gp4")), Some(AudioFormat::ThreeGp));
    }

    #[test]
    fn test_sniff_rejects_unknown_bytes() {
        assert_eq!(AudioFormat::sniff(b"hello world"), None);
        assert_eq!(AudioFormat::sniff(&ftyp(b"isom")), None);
        assert_eq!(AudioFormat::sniff(&[]), None);
    }

    #[test]
    fn test_declared_format_wins() {
        let format = resolve_format(b"not audio", Some("ogg"), &all_formats(), 1024).unwrap();
        assert_eq!(format, AudioFormat::Ogg);
    }

    #[test]
    fn test_resolve_validation_errors() {
        let allowed = all_formats();
        assert!(matches!(
            resolve_format(&[], None, &allowed, 1024),
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            resolve_format(&[0u8; 2048], None, &allowed, 1024),
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            resolve_format(b"garbage bytes", None, &allowed, 1024),
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            resolve_format(&wav_header(), Some("aiff"), &allowed, 1024),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_format_outside_allow_list_is_rejected() {
        let only_wav = vec!["wav".to_string()];
        assert!(resolve_format(&wav_header(), None, &only_wav, 1024).is_ok());
        assert!(matches!(
            resolve_format(b"OggS\0\x02", None, &only_wav, 1024),
            Err(AppError::ValidationError(_))
        ));
    }
}
