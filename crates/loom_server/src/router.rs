//! HTTP Router
//!
//! Sets up the axum router with the bridge WebSocket endpoint.

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handler::handle_websocket;
use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Bridge sessions
        .route("/ws", get(ws_upgrade))
        // Health check for monitoring/load balancers
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        // CORS for development
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// WebSocket upgrade handler
async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    sessions: usize,
    exposed: usize,
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.session_count(),
        exposed: state.exposed_count(),
    })
}
