//! Envelope and wire message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One normalized partial update, produced once per raw feed record.
///
/// The tree has exactly one canonical root key (the topic's key) and is
/// consumed exactly once by the state cache, then forwarded verbatim to
/// subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEnvelope {
    /// Normalized partial state tree.
    pub update: Value,
    /// When the processor produced the envelope.
    pub produced_at: DateTime<Utc>,
}

impl UpdateEnvelope {
    /// Wrap a normalized tree produced at `produced_at`.
    #[must_use]
    pub fn new(update: Value, produced_at: DateTime<Utc>) -> Self {
        Self {
            update,
            produced_at,
        }
    }
}

/// A message on the subscriber wire.
///
/// The first message after attach is always a [`WireMessage::FullState`];
/// every subsequent message is a [`WireMessage::Update`] to be merged
/// client-side with the identical merge rules. `seq` is the applied-update
/// sequence number, monotonic per stream, so a client can detect re-delivery
/// after reconnect and recover idempotently from the fresh snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireMessage {
    /// Full, self-consistent snapshot of canonical state.
    #[serde(rename_all = "camelCase")]
    FullState {
        /// Deep copy of canonical state at sequence `seq`.
        state: Value,
        /// Applied-update sequence number the snapshot reflects.
        seq: u64,
    },
    /// Ordered incremental delta.
    #[serde(rename_all = "camelCase")]
    Update {
        /// Partial state tree, one canonical root key.
        update: Value,
        /// Sequence number assigned when the update was applied.
        seq: u64,
        /// When the processor produced the update.
        produced_at: DateTime<Utc>,
    },
}

impl WireMessage {
    /// Serialize for the newline-delimited JSON wire.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse one wire line.
    ///
    /// # Errors
    ///
    /// Returns error on malformed JSON or an unknown message shape.
    pub fn from_json(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}
