//! Timestamped file replay.
//!
//! Replays a newline-delimited JSON recording of `{timestamp, topic, data}`
//! records. Inter-record delays are computed from the recorded timestamps
//! rather than replaying at maximum speed, so the downstream pipeline sees
//! realistic load. The stream terminates at end-of-file or when the optional
//! max duration of recorded time has elapsed.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::record::{FeedEvent, RawRecord};
use crate::FeedError;

/// Configuration for the replay feed.
#[derive(Debug, Clone)]
pub struct SimulationFeedConfig {
    /// Recording file path.
    pub path: PathBuf,
    /// Stop after this much recorded time has been replayed.
    pub max_duration: Option<Duration>,
}

/// One recorded line.
#[derive(Debug, Deserialize)]
struct RecordedLine {
    timestamp: DateTime<Utc>,
    topic: String,
    data: Value,
}

/// File replay feed honoring recorded inter-record timing.
pub struct SimulationFeed {
    config: SimulationFeedConfig,
}

impl SimulationFeed {
    /// Create a replay feed for a recording.
    #[must_use]
    pub fn new(config: SimulationFeedConfig) -> Self {
        Self { config }
    }

    /// Start the replay.
    ///
    /// Emits `Connected`, then one `Record` per recorded line with the
    /// original gaps between them. The channel closes at end-of-file, which
    /// terminates the sequence.
    ///
    /// # Errors
    ///
    /// Returns error if the recording cannot be opened.
    pub async fn start(self) -> Result<mpsc::Receiver<FeedEvent>, FeedError> {
        let file = File::open(&self.config.path).await?;
        let (tx, rx) = mpsc::channel(256);

        tracing::info!(path = %self.config.path.display(), "Starting simulation replay");

        tokio::spawn(async move {
            let mut lines = BufReader::new(file).lines();
            let mut previous_ts: Option<DateTime<Utc>> = None;
            let mut replayed = Duration::ZERO;
            let mut sent: u64 = 0;

            if tx.send(FeedEvent::Connected).await.is_err() {
                return;
            }

            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        tracing::error!(error = %err, "Failed to read simulation file");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let recorded: RecordedLine = match serde_json::from_str(&line) {
                    Ok(recorded) => recorded,
                    Err(err) => {
                        tracing::warn!(error = %err, "Skipping malformed simulation line");
                        continue;
                    }
                };

                let gap = inter_record_gap(previous_ts, recorded.timestamp);
                previous_ts = Some(recorded.timestamp);
                replayed += gap;

                if let Some(max) = self.config.max_duration {
                    if replayed > max {
                        tracing::info!(
                            replayed_secs = replayed.as_secs(),
                            "Max replay duration reached, stopping simulation"
                        );
                        break;
                    }
                }

                if !gap.is_zero() {
                    tokio::time::sleep(gap).await;
                }

                let payload = match serde_json::to_vec(&recorded.data) {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::warn!(error = %err, "Skipping unserializable simulation line");
                        continue;
                    }
                };

                let record = RawRecord::new(recorded.topic, payload);
                if tx.send(FeedEvent::Record(record)).await.is_err() {
                    tracing::warn!("Record receiver dropped, stopping simulation");
                    return;
                }
                sent += 1;
            }

            tracing::info!(records = sent, "Simulation playback completed");
        });

        Ok(rx)
    }
}

/// Delay before replaying a record, from the recorded timestamps.
///
/// Out-of-order timestamps clamp to zero rather than stalling the replay.
fn inter_record_gap(previous: Option<DateTime<Utc>>, current: DateTime<Utc>) -> Duration {
    let Some(previous) = previous else {
        return Duration::ZERO;
    };
    (current - previous).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_recording(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[tokio::test]
    async fn replays_records_in_order() {
        let file = write_recording(&[
            r#"{"timestamp":"2024-05-26T13:00:00Z","topic":"DriverList","data":{"1":{"FirstName":"Max"}}}"#,
            r#"{"timestamp":"2024-05-26T13:00:00.050Z","topic":"LapCount","data":{"CurrentLap":3}}"#,
        ]);

        let feed = SimulationFeed::new(SimulationFeedConfig {
            path: file.path().to_path_buf(),
            max_duration: None,
        });
        let mut rx = feed.start().await.unwrap();

        assert!(matches!(rx.recv().await, Some(FeedEvent::Connected)));
        let Some(FeedEvent::Record(first)) = rx.recv().await else {
            panic!("expected first record");
        };
        assert_eq!(first.topic, "DriverList");
        let Some(FeedEvent::Record(second)) = rx.recv().await else {
            panic!("expected second record");
        };
        assert_eq!(second.topic, "LapCount");

        // End-of-file closes the stream.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn skips_malformed_lines() {
        let file = write_recording(&[
            "not json",
            r#"{"timestamp":"2024-05-26T13:00:00Z","topic":"LapCount","data":{"CurrentLap":4}}"#,
        ]);

        let feed = SimulationFeed::new(SimulationFeedConfig {
            path: file.path().to_path_buf(),
            max_duration: None,
        });
        let mut rx = feed.start().await.unwrap();

        assert!(matches!(rx.recv().await, Some(FeedEvent::Connected)));
        let Some(FeedEvent::Record(record)) = rx.recv().await else {
            panic!("expected record after malformed line");
        };
        assert_eq!(record.topic, "LapCount");
    }

    #[tokio::test]
    async fn honors_max_duration() {
        let file = write_recording(&[
            r#"{"timestamp":"2024-05-26T13:00:00Z","topic":"LapCount","data":{"CurrentLap":1}}"#,
            r#"{"timestamp":"2024-05-26T13:00:00.020Z","topic":"LapCount","data":{"CurrentLap":2}}"#,
            r#"{"timestamp":"2024-05-26T14:00:00Z","topic":"LapCount","data":{"CurrentLap":3}}"#,
        ]);

        let feed = SimulationFeed::new(SimulationFeedConfig {
            path: file.path().to_path_buf(),
            max_duration: Some(Duration::from_secs(60)),
        });
        let mut rx = feed.start().await.unwrap();

        let mut records = 0;
        while let Some(event) = rx.recv().await {
            if matches!(event, FeedEvent::Record(_)) {
                records += 1;
            }
        }
        // The third record sits an hour into the recording, past the cap.
        assert_eq!(records, 2);
    }

    #[test]
    fn gap_clamps_out_of_order_timestamps() {
        let earlier = "2024-05-26T13:00:00Z".parse().unwrap();
        let later = "2024-05-26T13:00:01Z".parse().unwrap();

        assert_eq!(inter_record_gap(None, later), Duration::ZERO);
        assert_eq!(inter_record_gap(Some(earlier), later), Duration::from_secs(1));
        assert_eq!(inter_record_gap(Some(later), earlier), Duration::ZERO);
    }
}
