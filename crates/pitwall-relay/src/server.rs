//! TCP subscriber endpoint.
//!
//! Thin wire glue: each accepted connection becomes one subscriber. The
//! connection task requests attachment from the runtime (which serializes it
//! against update application), then forwards its queued messages as
//! newline-delimited JSON. A write failure or a closed peer ends the task;
//! dropping the queue receiver is what detaches the subscriber.

use anyhow::{Context, Result};
use pitwall_core::WireMessage;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// A connection task asking the runtime to attach it.
#[derive(Debug)]
pub struct AttachRequest {
    /// Receives the subscriber id and its message queue.
    pub reply: oneshot::Sender<(Uuid, mpsc::Receiver<WireMessage>)>,
}

/// Accept subscribers forever.
///
/// # Errors
///
/// Returns error if the listen address cannot be bound.
pub async fn run(listen_addr: String, attach_tx: mpsc::Sender<AttachRequest>) -> Result<()> {
    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Failed to bind subscriber listener on {listen_addr}"))?;

    tracing::info!(addr = %listen_addr, "Subscriber endpoint listening");

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .context("Failed to accept subscriber connection")?;

        tracing::info!(%peer, "Subscriber connecting");
        let attach_tx = attach_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_subscriber(stream, attach_tx).await {
                tracing::debug!(%peer, error = %err, "Subscriber connection ended");
            }
        });
    }
}

async fn serve_subscriber(
    stream: TcpStream,
    attach_tx: mpsc::Sender<AttachRequest>,
) -> Result<()> {
    let (reply_tx, reply_rx) = oneshot::channel();
    attach_tx
        .send(AttachRequest { reply: reply_tx })
        .await
        .context("Runtime gone, cannot attach subscriber")?;
    let (id, mut messages) = reply_rx.await.context("Attach request dropped")?;

    let (mut reader, mut writer) = stream.into_split();
    let mut inbound = [0u8; 1024];

    loop {
        tokio::select! {
            message = messages.recv() => {
                let Some(message) = message else {
                    // Queue closed: the broadcaster dropped us as lagging.
                    tracing::warn!(subscriber = %id, "Outbound queue closed, disconnecting subscriber");
                    break;
                };
                let mut line = message.to_json().context("Failed to encode wire message")?;
                line.push('\n');
                if let Err(err) = writer.write_all(line.as_bytes()).await {
                    tracing::info!(subscriber = %id, error = %err, "Subscriber write failed, dropping");
                    break;
                }
            }
            read = reader.read(&mut inbound) => {
                match read {
                    // Inbound data is ignored; zero bytes means the peer closed.
                    Ok(0) | Err(_) => {
                        tracing::info!(subscriber = %id, "Subscriber disconnected");
                        break;
                    }
                    Ok(_) => {}
                }
            }
        }
    }

    // Dropping `messages` here is what detaches us from the broadcaster.
    Ok(())
}
