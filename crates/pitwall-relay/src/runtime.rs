//! Relay runtime orchestration.
//!
//! One task owns the whole ordered path: feed event in, envelope out, merge
//! into canonical state, fan out. Subscriber attachment goes through the same
//! task, so a snapshot at sequence N is followed by exactly the deltas after
//! N: no torn reads, no missed or duplicated update at the attach boundary.

use crate::broadcast::Broadcaster;
use crate::cache::SessionCache;
use crate::config::{FeedMode, RelayConfig};
use crate::persistence::{self, PersistCommand, SqliteStore, SNAPSHOT_INTERVAL};
use crate::processor::StateProcessor;
use crate::server::{self, AttachRequest};
use anyhow::{Context, Result};
use pitwall_core::WireMessage;
use pitwall_feed::{FeedEvent, LiveFeed, LiveFeedConfig, SimulationFeed, SimulationFeedConfig};
use tokio::sync::mpsc;

/// The relay runtime.
pub struct Relay {
    config: RelayConfig,
}

impl Relay {
    /// Create a relay from configuration.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }

    /// Run until the upstream sequence ends or shutdown is requested.
    ///
    /// # Errors
    ///
    /// Returns error if a component fails to start. Per-record failures are
    /// contained and never surface here.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting relay runtime");

        let persist_tx = if self.config.persistence.enabled {
            let store = SqliteStore::open(&self.config.persistence.db_path)
                .context("Failed to open persistence database")?;
            let (tx, rx) = mpsc::channel(1024);
            persistence::spawn_writer(store, rx);
            tracing::info!(db = %self.config.persistence.db_path.display(), "Persistence enabled");
            Some(tx)
        } else {
            None
        };

        let mut feed_rx = match &self.config.mode {
            FeedMode::Live { broker } => {
                let feed = LiveFeed::new(LiveFeedConfig {
                    broker: broker.clone(),
                    ..LiveFeedConfig::default()
                })
                .context("Failed to create live feed")?;
                feed.start()
            }
            FeedMode::Simulate { path, max_duration } => {
                let feed = SimulationFeed::new(SimulationFeedConfig {
                    path: path.clone(),
                    max_duration: *max_duration,
                });
                feed.start().await.context("Failed to start simulation")?
            }
        };

        let (attach_tx, mut attach_rx) = mpsc::channel::<AttachRequest>(16);
        let listen_addr = self.config.listen_addr.clone();
        tokio::spawn(async move {
            if let Err(err) = server::run(listen_addr, attach_tx).await {
                tracing::error!(error = %err, "Subscriber endpoint failed");
            }
        });

        let processor = StateProcessor::new();
        let mut cache = SessionCache::new();
        let mut broadcaster = Broadcaster::new();
        let mut upstream_lost = false;

        loop {
            tokio::select! {
                event = feed_rx.recv() => {
                    match event {
                        None => {
                            tracing::info!("Upstream sequence ended, stopping runtime");
                            break;
                        }
                        Some(FeedEvent::Connected) => {
                            if upstream_lost {
                                upstream_lost = false;
                                // Deltas may have been missed while upstream
                                // was away; every attached subscriber restarts
                                // from a fresh snapshot.
                                tracing::info!("Upstream reconnected, re-snapshotting subscribers");
                                broadcaster.broadcast_snapshot(&cache.snapshot(), cache.seq());
                            }
                        }
                        Some(FeedEvent::Disconnected) => {
                            tracing::warn!("Upstream feed lost, awaiting reconnect");
                            upstream_lost = true;
                        }
                        Some(FeedEvent::Record(record)) => {
                            handle_record(
                                &record,
                                &processor,
                                &mut cache,
                                &mut broadcaster,
                                persist_tx.as_ref(),
                            );
                        }
                    }
                }

                Some(request) = attach_rx.recv() => {
                    let (id, rx) = broadcaster.attach(cache.snapshot(), cache.seq());
                    if request.reply.send((id, rx)).is_err() {
                        // Connection went away before the attach completed.
                        broadcaster.detach(id);
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        tracing::info!(seq = cache.seq(), subscribers = broadcaster.len(), "Relay stopped");
        Ok(())
    }
}

fn handle_record(
    record: &pitwall_feed::RawRecord,
    processor: &StateProcessor,
    cache: &mut SessionCache,
    broadcaster: &mut Broadcaster,
    persist_tx: Option<&mpsc::Sender<PersistCommand>>,
) {
    let envelope = match processor.process(record) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::warn!(topic = %record.topic, error = %err, "Skipping undecodable record");
            return;
        }
    };

    let outcome = match cache.apply(&envelope) {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!(topic = %record.topic, error = %err, "Update rejected, state unchanged");
            return;
        }
    };

    if outcome.session_restarted {
        broadcaster.broadcast_snapshot(&cache.snapshot(), outcome.seq);
    } else {
        broadcaster.publish(&WireMessage::Update {
            update: envelope.update.clone(),
            seq: outcome.seq,
            produced_at: envelope.produced_at,
        });
    }

    if let Some(persist_tx) = persist_tx {
        // Fire-and-forget: a saturated or gone writer never blocks delivery.
        let command = PersistCommand::Update {
            seq: outcome.seq,
            envelope,
        };
        if let Err(err) = persist_tx.try_send(command) {
            tracing::warn!(seq = outcome.seq, error = %err, "Dropped persistence write");
        }

        if outcome.seq % SNAPSHOT_INTERVAL == 0 {
            let command = PersistCommand::Snapshot {
                seq: outcome.seq,
                state: cache.snapshot(),
            };
            if let Err(err) = persist_tx.try_send(command) {
                tracing::warn!(seq = outcome.seq, error = %err, "Dropped snapshot write");
            }
        }
    }
}
