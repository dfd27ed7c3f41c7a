//! In-process transport
//!
//! Connects a [`Client`] straight to a [`Bridge`] session. Messages still
//! travel as JSON text, exactly as they would over a socket.

use std::sync::Arc;

use loom_client::{Client, ClientConfig};
use loom_server::Bridge;

/// Open a bridge session and a client attached to it
///
/// Must be called within a Tokio runtime. The session closes when the client
/// disconnects or every handle to it is dropped.
pub fn connect_local(bridge: &Arc<Bridge>, config: ClientConfig) -> Client {
    let (client, mut outbound) = Client::new(config);
    let (session_id, mut inbound) = bridge.open_session();

    // Client -> bridge, one request at a time
    let requests = bridge.clone();
    let mut closed = client.closed_signal();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                message = outbound.recv() => {
                    let Some(message) = message else { break };
                    match serde_json::to_string(&message) {
                        Ok(text) => requests.handle_text(session_id, &text).await,
                        Err(e) => tracing::error!(%session_id, "Failed to serialize client message: {}", e),
                    }
                }
                _ = async {
                    let _ = closed.wait_for(|closed| *closed).await;
                } => break,
            }
        }
        requests.close_session(session_id);
    });

    // Bridge -> client, in send order
    let weak = client.downgrade();
    tokio::spawn(async move {
        while let Some(message) = inbound.recv().await {
            let Some(client) = weak.upgrade() else {
                break;
            };
            match serde_json::to_string(&message) {
                Ok(text) => {
                    let _ = client.handle_text(&text);
                }
                Err(e) => tracing::error!(%session_id, "Failed to serialize server message: {}", e),
            }
        }
        if let Some(client) = weak.upgrade() {
            client.disconnect();
        }
    });

    client
}
