//! Raw record to update envelope transformation.
//!
//! One record in, one envelope out: decode the payload (inflating compressed
//! topics), normalize keys, wrap under the topic's canonical root key.
//! Processing is strictly ordered across all topics; the runtime runs exactly
//! one processor so later records can depend on the cumulative effect of
//! earlier ones.
//!
//! Decoding lives here and only here: the feed adapter hands payload bytes
//! through untouched.

use std::io::Read;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::DeflateDecoder;
use pitwall_core::{normalize_keys, topics, UpdateEnvelope};
use pitwall_feed::RawRecord;
use serde_json::{Map, Value};

/// Decode failure; the offending record is skipped, the pipeline continues.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Payload is not valid JSON.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    /// Compressed payload is not valid base64.
    #[error("invalid base64 in compressed payload: {0}")]
    Base64(#[from] base64::DecodeError),
    /// Compressed payload failed to inflate.
    #[error("failed to inflate compressed payload: {0}")]
    Inflate(#[from] std::io::Error),
}

/// Turns raw feed records into normalized update envelopes.
#[derive(Debug, Default)]
pub struct StateProcessor;

impl StateProcessor {
    /// Create a processor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Transform one raw record into one envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError`] when the payload cannot be decoded; the
    /// caller logs and skips the record.
    pub fn process(&self, record: &RawRecord) -> Result<UpdateEnvelope, ProcessError> {
        let decoded = if topics::is_compressed(&record.topic) {
            inflate_payload(&record.payload)?
        } else {
            serde_json::from_slice(&record.payload)?
        };

        let normalized = normalize_keys(&decoded);

        let mut update = Map::new();
        update.insert(topics::canonical_key(&record.topic), normalized);

        Ok(UpdateEnvelope::new(
            Value::Object(update),
            record.received_at,
        ))
    }
}

/// Decode a base64+deflate compressed topic payload.
///
/// The payload on the wire is either the base64 string itself or a JSON
/// string wrapping it.
fn inflate_payload(payload: &[u8]) -> Result<Value, ProcessError> {
    let encoded = match serde_json::from_slice::<Value>(payload) {
        Ok(Value::String(inner)) => inner,
        _ => String::from_utf8_lossy(payload).trim().to_string(),
    };

    let compressed = BASE64.decode(encoded.as_bytes())?;

    let mut inflated = Vec::new();
    DeflateDecoder::new(compressed.as_slice()).read_to_end(&mut inflated)?;

    Ok(serde_json::from_slice(&inflated)?)
}
