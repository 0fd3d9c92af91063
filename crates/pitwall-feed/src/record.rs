//! Raw feed records and adapter events.

use chrono::{DateTime, Utc};

/// One raw topic-tagged record from the upstream feed.
///
/// Immutable once produced. The topic determines the decode and merge policy
/// downstream; the payload is carried as-is (it may be a JSON tree or a
/// base64 compressed blob).
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// Feed topic name, e.g. `TimingData` or `CarData.z`.
    pub topic: String,
    /// Undecoded payload bytes.
    pub payload: Vec<u8>,
    /// When the adapter received the record.
    pub received_at: DateTime<Utc>,
}

impl RawRecord {
    /// Build a record received now.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Events emitted by a feed adapter.
///
/// The record stream ends when the channel closes: at end-of-file in
/// simulation mode, or when the live adapter gives up after exhausting its
/// retries.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Upstream connection established (also after a reconnect).
    Connected,
    /// Upstream connection lost; the adapter is retrying with backoff.
    Disconnected,
    /// One raw record, in feed order.
    Record(RawRecord),
}
