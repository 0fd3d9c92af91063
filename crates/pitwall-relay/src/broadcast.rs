//! Subscriber registry and fan-out.
//!
//! Each subscriber gets its own bounded queue; fan-out uses `try_send` so a
//! slow or unresponsive subscriber can never block delivery to the others.
//! A subscriber whose queue overflows or whose receiver is gone is dropped,
//! not retried. Ordering is guaranteed only within one subscriber's stream.
//!
//! Attach and publish are both called from the single runtime task, which
//! serializes "snapshot at sequence N" against "deltas after N" by
//! construction.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use pitwall_core::WireMessage;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// Outbound queue depth per subscriber.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

struct Subscriber {
    tx: mpsc::Sender<WireMessage>,
    attached_at: DateTime<Utc>,
}

/// Tracks attached subscribers and fans updates out to them.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: HashMap<Uuid, Subscriber>,
}

impl Broadcaster {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a subscriber.
    ///
    /// The snapshot is queued as the first message, before any subsequent
    /// delta, so the subscriber's stream is always snapshot-then-deltas.
    pub fn attach(&mut self, snapshot: Value, seq: u64) -> (Uuid, mpsc::Receiver<WireMessage>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);

        // Freshly created queue; the only way this fails is a zero capacity.
        let _ = tx.try_send(WireMessage::FullState {
            state: snapshot,
            seq,
        });

        self.subscribers.insert(
            id,
            Subscriber {
                tx,
                attached_at: Utc::now(),
            },
        );

        tracing::info!(subscriber = %id, seq, total = self.subscribers.len(), "Subscriber attached");
        (id, rx)
    }

    /// Detach a subscriber and release its queue.
    pub fn detach(&mut self, id: Uuid) {
        if self.subscribers.remove(&id).is_some() {
            tracing::info!(subscriber = %id, total = self.subscribers.len(), "Subscriber detached");
        }
    }

    /// Queue one message for every attached subscriber.
    ///
    /// Never blocks: subscribers with a full queue are dropped as lagging,
    /// subscribers whose receiver is gone are removed silently.
    pub fn publish(&mut self, message: &WireMessage) {
        let mut dropped = Vec::new();

        for (id, subscriber) in &self.subscribers {
            match subscriber.tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        subscriber = %id,
                        attached_at = %subscriber.attached_at,
                        "Subscriber queue full, dropping lagging subscriber"
                    );
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    dropped.push(*id);
                }
            }
        }

        for id in dropped {
            self.detach(id);
        }
    }

    /// Push a fresh full snapshot to every attached subscriber.
    ///
    /// Used after an upstream reconnect or a session restart, when deltas
    /// alone can no longer reproduce the canonical tree client-side.
    pub fn broadcast_snapshot(&mut self, snapshot: &Value, seq: u64) {
        self.publish(&WireMessage::FullState {
            state: snapshot.clone(),
            seq,
        });
    }

    /// Number of attached subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether no subscribers are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(seq: u64) -> WireMessage {
        WireMessage::Update {
            update: json!({"lapCount": {"currentLap": seq}}),
            seq,
            produced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn snapshot_is_first_message() {
        let mut broadcaster = Broadcaster::new();
        let (_, mut rx) = broadcaster.attach(json!({"lapCount": {"currentLap": 5}}), 5);
        broadcaster.publish(&update(6));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, WireMessage::FullState { seq: 5, .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, WireMessage::Update { seq: 6, .. }));
    }

    #[tokio::test]
    async fn late_attach_sees_no_earlier_updates() {
        let mut broadcaster = Broadcaster::new();
        broadcaster.publish(&update(1));
        broadcaster.publish(&update(2));

        let (_, mut rx) = broadcaster.attach(json!({"lapCount": {"currentLap": 2}}), 2);
        broadcaster.publish(&update(3));

        assert!(matches!(
            rx.recv().await.unwrap(),
            WireMessage::FullState { seq: 2, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            WireMessage::Update { seq: 3, .. }
        ));
    }

    #[tokio::test]
    async fn slow_subscriber_dropped_without_blocking_others() {
        let mut broadcaster = Broadcaster::new();
        let (slow_id, slow_rx) = broadcaster.attach(json!({}), 0);
        let (_, mut healthy_rx) = broadcaster.attach(json!({}), 0);

        // The healthy subscriber keeps up; the slow one never drains its
        // queue, where the snapshot already occupies one slot.
        assert!(matches!(
            healthy_rx.recv().await.unwrap(),
            WireMessage::FullState { .. }
        ));
        for seq in 0..SUBSCRIBER_QUEUE_CAPACITY as u64 {
            broadcaster.publish(&update(seq));
        }

        assert_eq!(broadcaster.len(), 1);
        drop(slow_rx);
        assert!(!broadcaster.is_empty());

        // The healthy subscriber still receives in order.
        assert!(matches!(
            healthy_rx.recv().await.unwrap(),
            WireMessage::Update { seq: 0, .. }
        ));

        // Re-detaching the dropped subscriber is a no-op.
        broadcaster.detach(slow_id);
    }

    #[tokio::test]
    async fn closed_receiver_removed_on_publish() {
        let mut broadcaster = Broadcaster::new();
        let (_, rx) = broadcaster.attach(json!({}), 0);
        drop(rx);

        broadcaster.publish(&update(1));
        assert!(broadcaster.is_empty());
    }
}
