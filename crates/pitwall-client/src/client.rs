//! TCP subscriber loop.
//!
//! Connects to a relay, feeds each newline-delimited wire message through
//! the [`ReplayBuffer`], and drains released messages into a
//! [`ClientSession`] on a short tick. The resulting tree is published over
//! a `watch` channel so callers always see the latest merged state.
//!
//! Reconnecting clears both the buffer and the session: the relay sends a
//! fresh snapshot on attach, and nothing buffered from the old connection
//! may leak past it.

use std::time::{Duration, Instant};

use pitwall_core::WireMessage;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};

use crate::{ClientError, ClientSession, ReplayBuffer};

/// How often buffered messages are released into the session.
const DRAIN_INTERVAL: Duration = Duration::from_millis(50);

/// Longest pause between reconnect attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Subscriber connection settings.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// Relay address, e.g. `127.0.0.1:8733`.
    pub addr: String,
    /// Time-shift applied to incoming messages.
    pub delay: Duration,
    /// Consecutive failed connection attempts before giving up.
    pub max_retries: u32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8733".to_string(),
            delay: Duration::ZERO,
            max_retries: 10,
        }
    }
}

/// A relay subscriber that maintains a delayed, locally merged state tree.
#[derive(Debug)]
pub struct Viewer {
    config: ViewerConfig,
    buffer: ReplayBuffer,
    session: ClientSession,
}

impl Viewer {
    /// Create a viewer for the given relay.
    #[must_use]
    pub fn new(config: ViewerConfig) -> Self {
        let buffer = ReplayBuffer::new(config.delay);
        Self {
            config,
            buffer,
            session: ClientSession::new(),
        }
    }

    /// Spawn the connection loop.
    ///
    /// Returns a watch handle carrying the current merged state and the
    /// task handle; the task resolves with an error only once the retry
    /// budget is exhausted.
    #[must_use]
    pub fn start(mut self) -> (watch::Receiver<Value>, JoinHandle<Result<(), ClientError>>) {
        let (state_tx, state_rx) = watch::channel(self.session.state().clone());
        let handle = tokio::spawn(async move { self.run(&state_tx).await });
        (state_rx, handle)
    }

    async fn run(&mut self, state_tx: &watch::Sender<Value>) -> Result<(), ClientError> {
        let mut attempt: u32 = 0;
        loop {
            match TcpStream::connect(&self.config.addr).await {
                Ok(stream) => {
                    tracing::info!(addr = %self.config.addr, "Connected to relay");
                    attempt = 0;
                    // Anything held over from the old connection is stale;
                    // the relay re-sends a full snapshot on attach.
                    self.buffer.clear();
                    self.session.clear();
                    self.serve(stream, state_tx).await;
                    tracing::warn!(addr = %self.config.addr, "Relay connection lost");
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.config.max_retries {
                        return Err(ClientError::RetriesExhausted {
                            addr: self.config.addr.clone(),
                            attempts: attempt,
                        });
                    }
                    let delay = backoff_delay(attempt);
                    tracing::warn!(
                        addr = %self.config.addr,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "Connection failed, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Pump one connection until the peer closes or errors.
    async fn serve(&mut self, stream: TcpStream, state_tx: &watch::Sender<Value>) {
        let (reader, _writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let mut ticker = interval(DRAIN_INTERVAL);

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => match WireMessage::from_json(&line) {
                        Ok(message) => self.buffer.enqueue(message, Instant::now()),
                        Err(err) => {
                            tracing::warn!(error = %err, "Undecodable message from relay, skipping");
                        }
                    },
                    Ok(None) => return,
                    Err(err) => {
                        tracing::warn!(error = %err, "Read error on relay connection");
                        return;
                    }
                },
                _ = ticker.tick() => {
                    self.release(state_tx);
                }
            }
        }
    }

    fn release(&mut self, state_tx: &watch::Sender<Value>) {
        let released = self.buffer.drain(Instant::now());
        if released.is_empty() {
            return;
        }
        for message in &released {
            if let Err(err) = self.session.apply(message) {
                tracing::warn!(error = %err, "Rejected message from relay");
            }
        }
        let _ = state_tx.send(self.session.state().clone());
    }

    /// Change the time-shift; already buffered messages keep their
    /// original release times.
    pub fn set_delay(&mut self, delay: Duration) {
        self.buffer.set_delay(delay);
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = Duration::from_secs(2u64.saturating_pow(attempt.min(16)));
    exp.min(MAX_BACKOFF)
}
