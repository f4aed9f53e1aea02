//! Text decoding and newline normalization.
//!
//! Student sources and program outputs arrive either UTF-8 or Shift-JIS;
//! everything else is treated as undecodable and surfaces as a stage
//! failure reason.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("content is neither valid UTF-8 nor Shift-JIS")]
    UnknownEncoding,
}

/// Decode bytes as UTF-8, falling back to Shift-JIS. Fails when the
/// Shift-JIS decode needed replacement characters.
pub fn decode_text(bytes: &[u8]) -> Result<String, DecodeError> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Ok(s.to_string()),
        Err(_) => {
            let (decoded, _, had_errors) = encoding_rs::SHIFT_JIS.decode(bytes);
            if had_errors {
                Err(DecodeError::UnknownEncoding)
            } else {
                Ok(decoded.into_owned())
            }
        }
    }
}

/// Like [`decode_text`] but never fails; undecodable bytes become
/// replacement characters. Used for compiler diagnostics, where a readable
/// approximation beats an error.
pub fn decode_text_lossy(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => encoding_rs::SHIFT_JIS.decode(bytes).0.into_owned(),
    }
}

/// Map `\r\n` and bare `\r` to `\n`.
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}
