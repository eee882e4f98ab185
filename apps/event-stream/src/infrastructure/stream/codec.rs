//! Envelope Codec
//!
//! Decodes inbound text frames into [`Envelope`]s and encodes outbound ones.
//!
//! A frame must be a single JSON object with a string `type` field. The
//! `payload` field may hold any JSON value and defaults to `null`.

use crate::domain::envelope::{Envelope, Payload};

/// Longest frame prefix echoed back in error messages.
const PREVIEW_LEN: usize = 50;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame is not a JSON object.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    /// The object has no string `type` field.
    #[error("message has no string 'type' field")]
    MissingType,
}

/// JSON codec for envelope frames.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame into an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON, is not an object, or
    /// lacks a string `type` field.
    pub fn decode(&self, text: &str) -> Result<Envelope, CodecError> {
        let trimmed = text.trim();

        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}...",
                preview(trimmed)
            )));
        }

        let value: serde_json::Value = serde_json::from_str(trimmed)?;
        let serde_json::Value::Object(mut object) = value else {
            return Err(CodecError::InvalidFormat(
                "expected JSON object".to_string(),
            ));
        };

        let message_type = match object.remove("type") {
            Some(serde_json::Value::String(message_type)) => message_type,
            _ => return Err(CodecError::MissingType),
        };
        let payload = object.remove("payload").unwrap_or(Payload::Null);

        Ok(Envelope {
            message_type,
            payload,
        })
    }

    /// Encode an envelope as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, envelope: &Envelope) -> Result<String, CodecError> {
        Ok(serde_json::to_string(envelope)?)
    }
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(PREVIEW_LEN) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
