//! WebSocket transport
//!
//! Connects a [`Client`] to a bridge server. A writer task drains the
//! client's outbound queue; a reader task feeds inbound frames back in order.

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::client::{Client, ClientConfig};
use crate::error::ClientError;

/// Connect to a bridge server at `url` (e.g. `ws://127.0.0.1:8765/ws`)
pub async fn connect(url: &str, config: ClientConfig) -> Result<Client, ClientError> {
    let timeout = config.connect_timeout();
    let (stream, _response) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .map_err(|_| ClientError::Connect(format!("timed out connecting to {url}")))?
        .map_err(|e| ClientError::Connect(e.to_string()))?;
    tracing::info!(%url, "Connected to bridge server");

    let (mut write, mut read) = stream.split();
    let (client, mut outbound) = Client::new(config);

    // Writer: outbound queue -> socket
    let mut closed = client.closed_signal();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                message = outbound.recv() => {
                    let Some(message) = message else { break };
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!("Failed to serialize client message: {}", e);
                            continue;
                        }
                    };
                    if write.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                _ = async {
                    let _ = closed.wait_for(|closed| *closed).await;
                } => break,
            }
        }
        let _ = write.close().await;
    });

    // Reader: socket -> client, in arrival order
    let weak = client.downgrade();
    tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            let Some(client) = weak.upgrade() else {
                break;
            };
            match frame {
                Ok(Message::Text(text)) => {
                    // A malformed frame is logged and skipped; the session continues.
                    let _ = client.handle_text(&text);
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("WebSocket error: {}", e);
                    break;
                }
            }
        }
        if let Some(client) = weak.upgrade() {
            client.disconnect();
        }
    });

    Ok(client)
}
