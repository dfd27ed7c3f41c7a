//! WebSocket Connection Handler
//!
//! One bridge session per socket. Text frames carry one JSON message each.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};

use crate::state::AppState;

/// Handle a WebSocket connection
pub async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // The session channel yields `connected` first
    let (session_id, mut rx) = state.bridge().open_session();

    // Forward outbound messages to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!(%session_id, "Failed to serialize server message: {}", e),
            }
        }
        let _ = ws_sender.close().await;
    });

    // Requests from one socket are handled in arrival order
    let bridge = state.bridge().clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    bridge.handle_text(session_id, &text).await;
                }
                Message::Binary(_) => {
                    tracing::debug!(%session_id, "Ignoring binary frame");
                }
                Message::Close(_) => {
                    break;
                }
                Message::Ping(_data) => {
                    // Pong is handled automatically by axum
                    tracing::trace!(%session_id, "Received ping");
                }
                Message::Pong(_) => {}
            }
        }
    });

    // Wait for either task to complete, then stop the other
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Cleanup
    state.bridge().close_session(session_id);
}
