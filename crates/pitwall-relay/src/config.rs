//! Relay configuration.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upstream mode.
    pub mode: FeedMode,

    /// Subscriber listen address.
    pub listen_addr: String,

    /// Durable persistence settings.
    pub persistence: PersistenceConfig,
}

/// Upstream feed mode.
#[derive(Debug, Clone)]
pub enum FeedMode {
    /// Live MQTT push feed.
    Live {
        /// Broker URL.
        broker: String,
    },
    /// Timestamped file replay.
    Simulate {
        /// Recording file path.
        path: PathBuf,
        /// Optional cap on replayed recorded time.
        max_duration: Option<Duration>,
    },
}

/// Persistence configuration.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Whether the append-only store is enabled.
    pub enabled: bool,

    /// Database path.
    pub db_path: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mode: FeedMode::Live {
                broker: "tcp://localhost:1883".to_string(),
            },
            listen_addr: "127.0.0.1:8733".to_string(),
            persistence: PersistenceConfig {
                enabled: false,
                db_path: PathBuf::from("./pitwall.db"),
            },
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PITWALL_MODE`: `live` (default) or `simulate`
    /// - `PITWALL_BROKER`: MQTT broker URL for live mode
    /// - `PITWALL_SIM_FILE`: recording path, required in simulate mode
    /// - `PITWALL_SIM_MAX_SECS`: cap on replayed recorded time
    /// - `PITWALL_LISTEN`: subscriber listen address
    /// - `PITWALL_PERSIST`: `1`/`true` to enable the append-only store
    /// - `PITWALL_DB_PATH`: SQLite database path
    ///
    /// # Errors
    ///
    /// Returns error on an unknown mode, a missing simulation file, or an
    /// unparseable duration.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        let mode = std::env::var("PITWALL_MODE").unwrap_or_else(|_| "live".to_string());
        match mode.as_str() {
            "live" => {
                if let Ok(broker) = std::env::var("PITWALL_BROKER") {
                    config.mode = FeedMode::Live { broker };
                }
            }
            "simulate" => {
                let path = std::env::var("PITWALL_SIM_FILE")
                    .context("PITWALL_SIM_FILE is required in simulate mode")?;
                let max_duration = match std::env::var("PITWALL_SIM_MAX_SECS") {
                    Ok(secs) => Some(Duration::from_secs(
                        secs.parse().context("Invalid PITWALL_SIM_MAX_SECS")?,
                    )),
                    Err(_) => None,
                };
                config.mode = FeedMode::Simulate {
                    path: PathBuf::from(path),
                    max_duration,
                };
            }
            other => bail!("Unknown PITWALL_MODE '{other}', expected 'live' or 'simulate'"),
        }

        if let Ok(listen) = std::env::var("PITWALL_LISTEN") {
            config.listen_addr = listen;
        }

        if let Ok(persist) = std::env::var("PITWALL_PERSIST") {
            config.persistence.enabled = persist == "1" || persist.eq_ignore_ascii_case("true");
        }

        if let Ok(db_path) = std::env::var("PITWALL_DB_PATH") {
            config.persistence.db_path = PathBuf::from(db_path);
        }

        Ok(config)
    }
}
