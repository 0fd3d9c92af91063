//! Upstream topic catalog and MQTT topic scheme.
//!
//! The feed carries a fixed set of named channels. Each topic has a canonical
//! root key in the state tree, a payload encoding (plain JSON or a
//! deflate-compressed blob, marked by the `.z` suffix), and an array merge
//! policy. The policy table is feed-specific and lives here rather than being
//! guessed per message.

use crate::normalize::to_camel_case;

/// Protocol version for the MQTT topic scheme.
pub const PROTOCOL_VERSION: &str = "v1";

/// Suffix marking a base64+deflate compressed payload.
pub const COMPRESSED_SUFFIX: &str = ".z";

/// The fixed topic set subscribed on connect.
pub const SUBSCRIBED_TOPICS: &[&str] = &[
    "Heartbeat",
    "CarData.z",
    "Position.z",
    "ExtrapolatedClock",
    "TopThree",
    "RcmSeries",
    "TimingStats",
    "TimingAppData",
    "WeatherData",
    "TrackStatus",
    "SessionStatus",
    "DriverList",
    "RaceControlMessages",
    "SessionInfo",
    "SessionData",
    "LapCount",
    "TimingData",
    "TeamRadio",
    "PitLaneTimeCollection",
    "ChampionshipPrediction",
];

/// Merge policy for array nodes under a topic root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayStrategy {
    /// The update array replaces the base array wholesale.
    Replace,
    /// Update items are appended to the base array in order.
    Extend,
}

/// Whether a topic's payload arrives base64+deflate compressed.
#[must_use]
pub fn is_compressed(topic: &str) -> bool {
    topic.ends_with(COMPRESSED_SUFFIX)
}

/// Topic name with any compression suffix stripped.
#[must_use]
pub fn base_name(topic: &str) -> &str {
    topic.strip_suffix(COMPRESSED_SUFFIX).unwrap_or(topic)
}

/// Canonical state-tree root key for a topic.
///
/// Documented per-topic overrides take precedence over plain camelCasing:
/// `Position.z` lands under `positionData` to keep it distinct from the
/// per-driver `position` fields inside timing lines.
#[must_use]
pub fn canonical_key(topic: &str) -> String {
    match base_name(topic) {
        "Position" => "positionData".to_string(),
        base => to_camel_case(base),
    }
}

/// Array merge policy for a canonical root key.
///
/// Sample-stream topics (car telemetry, position history) accumulate, so
/// their arrays extend; every other topic replaces arrays wholesale.
#[must_use]
pub fn array_strategy(canonical_key: &str) -> ArrayStrategy {
    match canonical_key {
        "carData" | "positionData" => ArrayStrategy::Extend,
        _ => ArrayStrategy::Replace,
    }
}

/// MQTT topic scheme for the live feed.
///
/// Topic structure: `{prefix}/{version}/{feed topic}`.
#[derive(Debug, Clone)]
pub struct TopicScheme {
    /// Topic prefix (default: "livetiming").
    pub prefix: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self {
            prefix: "livetiming".to_string(),
        }
    }
}

impl TopicScheme {
    /// Create a scheme with a custom prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// MQTT topic for one feed topic.
    #[must_use]
    pub fn topic(&self, feed_topic: &str) -> String {
        format!("{}/{}/{}", self.prefix, PROTOCOL_VERSION, feed_topic)
    }

    /// Parse an MQTT topic back into the feed topic name.
    #[must_use]
    pub fn parse<'a>(&self, mqtt_topic: &'a str) -> Option<&'a str> {
        let expected_prefix = format!("{}/{}/", self.prefix, PROTOCOL_VERSION);
        let feed_topic = mqtt_topic.strip_prefix(expected_prefix.as_str())?;
        if feed_topic.is_empty() || feed_topic.contains('/') {
            return None;
        }
        Some(feed_topic)
    }
}
