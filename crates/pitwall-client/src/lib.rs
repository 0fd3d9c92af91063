//! # Pitwall Client
//!
//! Subscriber-side building blocks:
//! - [`ReplayBuffer`]: time-shifts the incoming stream by a configurable
//!   delay while preserving arrival order
//! - [`ClientSession`]: the locally merged state tree, rebuilt from a
//!   snapshot plus deltas with the relay's exact merge rules
//! - [`Viewer`]: a TCP subscriber loop wiring the two together, with
//!   snapshot-restart reconnect semantics

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod replay;
pub mod session;

pub use client::{Viewer, ViewerConfig};
pub use replay::ReplayBuffer;
pub use session::ClientSession;

/// Errors raised by the subscriber connection.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Relay connection failed or was lost.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    /// The relay kept refusing connections past the retry budget.
    #[error("gave up connecting to {addr} after {attempts} attempts")]
    RetriesExhausted {
        /// Relay address.
        addr: String,
        /// Attempts made.
        attempts: u32,
    },
}
