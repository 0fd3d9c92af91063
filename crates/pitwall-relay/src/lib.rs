//! # Pitwall Relay
//!
//! Reconciles the multiplexed upstream feed into one canonical state tree and
//! republishes it to subscribers as a snapshot plus ordered deltas.
//!
//! ## Architecture
//!
//! A pipeline of tokio tasks connected by ordered channels:
//! 1. **Feed adapter** (`pitwall-feed`): one upstream connection, raw records
//! 2. **Processor**: decode, normalize, wrap under the canonical root key
//! 3. **Cache**: single-writer merge into canonical state, snapshots
//! 4. **Broadcaster**: per-subscriber bounded queues, snapshot on attach
//! 5. **Persistence**: append-only update log, off the critical path
//!
//! Steps 2-4 run on the single runtime task, which also serializes subscriber
//! attachment against update application. That is what makes a snapshot at
//! sequence N reflect exactly the first N updates, with no torn reads.

#![warn(clippy::all)]

pub mod broadcast;
pub mod cache;
pub mod config;
pub mod persistence;
pub mod processor;
pub mod runtime;
pub mod server;

pub use config::{FeedMode, RelayConfig};
pub use runtime::Relay;
