//! # Pitwall Core
//!
//! Pure reconciliation primitives shared by the relay and its clients.
//!
//! This crate provides:
//! - Wire-key normalization (snake_case/PascalCase to camelCase, private keys
//!   dropped)
//! - The deterministic merge engine applied to canonical state and,
//!   identically, on the client side
//! - The upstream topic catalog with per-topic merge policy
//! - Envelope and wire message types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod merge;
pub mod messages;
pub mod normalize;
pub mod topics;

pub use merge::{merge, MergeError, MergeRules};
pub use messages::{UpdateEnvelope, WireMessage};
pub use normalize::{normalize_keys, to_camel_case};
pub use topics::{ArrayStrategy, TopicScheme, SUBSCRIBED_TOPICS};
