//! Live MQTT feed adapter.

use std::time::Duration;

use pitwall_core::topics::{TopicScheme, SUBSCRIBED_TOPICS};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use url::Url;

use crate::record::{FeedEvent, RawRecord};
use crate::FeedError;

/// Maximum reconnect backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Consecutive failures before the adapter gives up and closes the stream.
const MAX_RETRIES: u32 = 10;

/// Configuration for the live feed.
#[derive(Debug, Clone)]
pub struct LiveFeedConfig {
    /// MQTT broker URL (e.g. `tcp://localhost:1883`).
    pub broker: String,
    /// Client ID for the MQTT connection.
    pub client_id: String,
    /// Topic scheme mapping feed topics to MQTT topics.
    pub scheme: TopicScheme,
    /// Keep-alive interval.
    pub keep_alive: Duration,
}

impl Default for LiveFeedConfig {
    fn default() -> Self {
        Self {
            broker: "tcp://localhost:1883".to_string(),
            client_id: "pitwall-feed".to_string(),
            scheme: TopicScheme::default(),
            keep_alive: Duration::from_secs(30),
        }
    }
}

/// Live subscribe-by-topic feed over MQTT.
pub struct LiveFeed {
    client: AsyncClient,
    eventloop: EventLoop,
    config: LiveFeedConfig,
}

impl LiveFeed {
    /// Create a live feed for the given broker.
    ///
    /// # Errors
    ///
    /// Returns error if the broker URL is invalid.
    pub fn new(config: LiveFeedConfig) -> Result<Self, FeedError> {
        let (host, port) = parse_mqtt_url(&config.broker)?;

        let mut mqtt_options = MqttOptions::new(&config.client_id, host, port);
        mqtt_options.set_keep_alive(config.keep_alive);

        let (client, eventloop) = AsyncClient::new(mqtt_options, 100);

        Ok(Self {
            client,
            eventloop,
            config,
        })
    }

    /// Start receiving records.
    ///
    /// Subscribes to the fixed topic catalog on every (re)connect and emits
    /// [`FeedEvent`]s in feed order. Transport failures trigger exponential
    /// backoff; the stream closes after [`MAX_RETRIES`] consecutive failures.
    #[must_use]
    pub fn start(mut self) -> mpsc::Receiver<FeedEvent> {
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            let mut retry_count: u32 = 0;
            let mut was_connected = false;

            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!(broker = %self.config.broker, "Connected to upstream feed");
                        retry_count = 0;
                        was_connected = true;

                        if let Err(err) = subscribe_all(&self.client, &self.config.scheme).await {
                            tracing::error!(error = %err, "Failed to subscribe to topic catalog");
                        }
                        if tx.send(FeedEvent::Connected).await.is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        tracing::debug!("Subscription acknowledged");
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let Some(topic) = self.config.scheme.parse(&publish.topic) else {
                            tracing::debug!(topic = %publish.topic, "Ignoring foreign MQTT topic");
                            continue;
                        };

                        tracing::trace!(
                            topic,
                            payload_len = publish.payload.len(),
                            "Received feed record"
                        );

                        let record = RawRecord::new(topic, publish.payload.to_vec());
                        if tx.send(FeedEvent::Record(record)).await.is_err() {
                            tracing::warn!("Record receiver dropped, stopping live feed");
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        if was_connected {
                            was_connected = false;
                            if tx.send(FeedEvent::Disconnected).await.is_err() {
                                break;
                            }
                        }

                        retry_count += 1;
                        if retry_count > MAX_RETRIES {
                            tracing::error!(error = %err, "Max retries reached, giving up on upstream feed");
                            break;
                        }

                        let backoff = backoff_delay(retry_count);
                        tracing::warn!(
                            error = %err,
                            attempt = retry_count,
                            backoff_secs = backoff.as_secs(),
                            "Upstream feed error, reconnecting"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        });

        rx
    }
}

async fn subscribe_all(client: &AsyncClient, scheme: &TopicScheme) -> Result<(), FeedError> {
    for topic in SUBSCRIBED_TOPICS {
        client
            .subscribe(scheme.topic(topic), QoS::AtLeastOnce)
            .await
            .map_err(|e| FeedError::Subscribe(e.to_string()))?;
    }
    tracing::info!(count = SUBSCRIBED_TOPICS.len(), "Subscribed to feed topics");
    Ok(())
}

/// Exponential backoff capped at [`MAX_BACKOFF`].
fn backoff_delay(attempt: u32) -> Duration {
    let secs = 2u64.saturating_pow(attempt.min(16));
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

/// Parse an MQTT URL into host and port.
fn parse_mqtt_url(input: &str) -> Result<(String, u16), FeedError> {
    if input.contains("://") {
        let url =
            Url::parse(input).map_err(|e| FeedError::InvalidBrokerUrl(format!("{input}: {e}")))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            scheme => {
                return Err(FeedError::InvalidBrokerUrl(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| FeedError::InvalidBrokerUrl(format!("{input}: missing host")))?;
        let port = url.port().unwrap_or(1883);

        return Ok((host.to_string(), port));
    }

    let mut parts = input.split(':');
    let host = parts
        .next()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| FeedError::InvalidBrokerUrl(format!("{input}: missing host")))?;
    let port = match parts.next() {
        None => 1883,
        Some(port) => port
            .parse()
            .map_err(|_| FeedError::InvalidBrokerUrl(format!("{input}: invalid port '{port}'")))?,
    };
    if parts.next().is_some() {
        return Err(FeedError::InvalidBrokerUrl(format!(
            "{input}: too many ':' separators"
        )));
    }

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mqtt_url_tcp() {
        let (host, port) = parse_mqtt_url("tcp://localhost:1883").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 1883);
    }

    #[test]
    fn parse_mqtt_url_default_port() {
        let (host, port) = parse_mqtt_url("tcp://feed.example.com").unwrap();
        assert_eq!(host, "feed.example.com");
        assert_eq!(port, 1883);
    }

    #[test]
    fn parse_mqtt_url_no_scheme() {
        let (host, port) = parse_mqtt_url("localhost:1884").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 1884);
    }

    #[test]
    fn parse_mqtt_url_rejects_garbage() {
        assert!(parse_mqtt_url("ws://broker:80").is_err());
        assert!(parse_mqtt_url("a:b:c").is_err());
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
        assert_eq!(backoff_delay(10), MAX_BACKOFF);
    }
}
