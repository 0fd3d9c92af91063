//! Relay binary entry point.

use anyhow::Result;
use pitwall_relay::{Relay, RelayConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Pitwall relay"
    );

    let config = RelayConfig::from_env()?;
    tracing::debug!(?config, "Loaded configuration");

    Relay::new(config).run().await?;

    Ok(())
}
