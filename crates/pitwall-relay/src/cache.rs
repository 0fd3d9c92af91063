//! Canonical session state.
//!
//! The cache owns the one mutable state tree. It is held exclusively by the
//! runtime task (single-writer discipline); everything else sees only
//! [`SessionCache::snapshot`] clones or the envelopes themselves. Updates
//! apply strictly in received order, so the state after N updates is a pure
//! function of the update sequence.

use chrono::{DateTime, Utc};
use pitwall_core::{merge, MergeError, MergeRules, UpdateEnvelope};
use serde_json::{Map, Value};

/// How often to log cache statistics.
const STATS_INTERVAL: u64 = 100;

/// Result of applying one envelope.
#[derive(Debug, Clone, Copy)]
pub struct ApplyOutcome {
    /// Sequence number assigned to this update.
    pub seq: u64,
    /// A new session was detected and the tree was reset before merging;
    /// subscribers need a fresh snapshot instead of this delta.
    pub session_restarted: bool,
}

/// Owner of the canonical state tree.
#[derive(Debug)]
pub struct SessionCache {
    state: Value,
    rules: MergeRules,
    seq: u64,
    last_applied: Option<DateTime<Utc>>,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Value::Object(Map::new()),
            rules: MergeRules::standard(),
            seq: 0,
            last_applied: None,
        }
    }

    /// Apply one envelope, in received order.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError`] for a malformed update; the canonical state is
    /// left exactly as it was, never partially applied.
    pub fn apply(&mut self, envelope: &UpdateEnvelope) -> Result<ApplyOutcome, MergeError> {
        // A non-object update never reports a restart, so the reset below
        // cannot run for an update the merge will reject: a rejected update
        // leaves the tree byte-for-byte unchanged.
        let session_restarted = self.detect_session_restart(&envelope.update);
        if session_restarted {
            tracing::info!("Session change detected, resetting canonical state");
            self.state = Value::Object(Map::new());
        }

        merge(&mut self.state, &envelope.update, &self.rules)?;
        self.seq += 1;
        self.last_applied = Some(envelope.produced_at);

        if self.seq % STATS_INTERVAL == 0 {
            tracing::info!(
                seq = self.seq,
                roots = self.state.as_object().map_or(0, Map::len),
                "Canonical state statistics"
            );
        }

        Ok(ApplyOutcome {
            seq: self.seq,
            session_restarted,
        })
    }

    /// Deep, point-in-time copy of canonical state.
    ///
    /// Safe to hand to a newly attached subscriber while further updates
    /// keep applying; it reflects exactly the updates applied so far.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        self.state.clone()
    }

    /// Applied-update sequence number.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// When the most recent update was produced.
    #[must_use]
    pub fn last_applied(&self) -> Option<DateTime<Utc>> {
        self.last_applied
    }

    /// An update that renames the session starts a new one: the old tree
    /// must not leak stale drivers or timing lines into it.
    fn detect_session_restart(&self, update: &Value) -> bool {
        let incoming = update
            .get("sessionInfo")
            .and_then(|info| info.get("name"))
            .and_then(Value::as_str);
        let current = self
            .state
            .get("sessionInfo")
            .and_then(|info| info.get("name"))
            .and_then(Value::as_str);

        matches!((current, incoming), (Some(current), Some(incoming)) if current != incoming)
    }
}
