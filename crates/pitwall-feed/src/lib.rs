//! # Pitwall Feed
//!
//! Maintains exactly one upstream connection and turns it into an ordered
//! stream of raw topic-tagged records. Two modes:
//!
//! - **Live**: MQTT subscribe-by-topic push feed with automatic
//!   reconnect/backoff
//! - **Simulation**: replay of a recorded `{timestamp, topic, data}` file
//!   honoring original inter-record timing
//!
//! The adapter only produces records; it never decodes payloads and never
//! touches canonical state.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod live;
pub mod record;
pub mod simulation;

pub use live::{LiveFeed, LiveFeedConfig};
pub use record::{FeedEvent, RawRecord};
pub use simulation::{SimulationFeed, SimulationFeedConfig};

/// Errors raised while establishing or running the upstream feed.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Invalid MQTT broker URL.
    #[error("invalid MQTT broker URL: {0}")]
    InvalidBrokerUrl(String),
    /// Topic subscription failed.
    #[error("subscription error: {0}")]
    Subscribe(String),
    /// Simulation file could not be read.
    #[error("simulation file error: {0}")]
    Io(#[from] std::io::Error),
}
