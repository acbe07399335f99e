//! Relay envelope: the outer wrapper around an end-to-end encrypted message.
//!
//! Clients send each message as one WebSocket text frame holding the base64
//! encoding of a UTF-8 JSON object:
//!
//! ```json
//! {"recipientId":"<user id>", "...": "opaque ciphertext fields"}
//! ```
//!
//! The relay decodes the wrapper only far enough to read `recipientId`.  The
//! remaining fields are never inspected, and the frame that reaches the
//! recipient is the sender's original text, not a re-encoding.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, Engine as _, GeneralPurpose, GeneralPurposeConfig};
use thiserror::Error;

/// Standard alphabet; on decode, padding is optional and stray trailing bits
/// are tolerated.
const ENVELOPE_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Field naming the addressed session.
pub const RECIPIENT_FIELD: &str = "recipientId";

/// Why an envelope could not be routed.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("envelope is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("envelope is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope has no string `recipientId`")]
    MissingRecipient,
}

/// Extracts the recipient id from a raw envelope frame.
///
/// Clients differ in how they wrap base64: any ASCII whitespace (including
/// line breaks) is skipped, and the URL-safe `-`/`_` characters are read as
/// their standard `+`/`/` counterparts.  Only the recipient is taken from
/// the decoded text; callers forward `raw` itself.
///
/// # Errors
///
/// One [`EnvelopeError`] variant per decoding stage that can fail.
pub fn parse_recipient(raw: &str) -> Result<String, EnvelopeError> {
    let bytes = ENVELOPE_ENGINE.decode(normalize_base64(raw))?;
    let text = String::from_utf8(bytes)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    value
        .get(RECIPIENT_FIELD)
        .and_then(serde_json::Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or(EnvelopeError::MissingRecipient)
}

fn normalize_base64(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_ascii_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect()
}

/// Wraps a JSON object into an envelope frame, as a sending client would.
pub fn encode_envelope(body: &serde_json::Value) -> String {
    ENVELOPE_ENGINE.encode(body.to_string())
}
