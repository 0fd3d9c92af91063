//! Viewer-side session state.
//!
//! Rebuilds the canonical tree from the wire stream: a full snapshot
//! replaces everything, each delta merges with the relay's exact rules.
//! Deltas arriving before any snapshot are dropped: after a disconnect the
//! stream must restart from a fresh snapshot, never assume continuity.

use pitwall_core::{merge, MergeError, MergeRules, WireMessage};
use serde_json::{Map, Value};

/// Locally merged state for one viewer.
#[derive(Debug)]
pub struct ClientSession {
    state: Value,
    rules: MergeRules,
    last_seq: Option<u64>,
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSession {
    /// Create an empty session awaiting its first snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Value::Object(Map::new()),
            rules: MergeRules::standard(),
            last_seq: None,
        }
    }

    /// Apply one wire message.
    ///
    /// A delta that does not directly follow the last applied message clears
    /// the session; merging resumes at the next snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError`] for a malformed delta; the local tree is left
    /// unchanged.
    pub fn apply(&mut self, message: &WireMessage) -> Result<(), MergeError> {
        match message {
            WireMessage::FullState { state, seq } => {
                self.state = state.clone();
                self.last_seq = Some(*seq);
                tracing::debug!(seq, "Applied full snapshot");
            }
            WireMessage::Update {
                update,
                seq,
                ..
            } => {
                let Some(last_seq) = self.last_seq else {
                    tracing::warn!(seq, "Delta before first snapshot, dropping");
                    return Ok(());
                };
                if *seq != last_seq + 1 {
                    // A gap means deltas were lost (e.g. dropped by the
                    // replay buffer); merging over it would diverge silently.
                    tracing::warn!(seq, last_seq, "Sequence gap in delta stream, awaiting fresh snapshot");
                    self.clear();
                    return Ok(());
                }
                merge(&mut self.state, update, &self.rules)?;
                self.last_seq = Some(*seq);
            }
        }
        Ok(())
    }

    /// The merged tree.
    #[must_use]
    pub fn state(&self) -> &Value {
        &self.state
    }

    /// One canonical root, if present.
    #[must_use]
    pub fn root(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Sequence number of the last applied message, if any.
    #[must_use]
    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    /// Whether a snapshot has been applied yet.
    #[must_use]
    pub fn is_synchronized(&self) -> bool {
        self.last_seq.is_some()
    }

    /// Forget everything; the next message must be a fresh snapshot.
    pub fn clear(&mut self) {
        self.state = Value::Object(Map::new());
        self.last_seq = None;
    }
}
