//! Loom Server - Backend endpoint of the model bridge
//!
//! [`Bridge`] is the transport-independent dispatcher: it resolves targets
//! through the registry, runs backend calls, and fans change notifications out
//! to every session mirroring the changed object. The axum router exposes it
//! over WebSocket.

pub use loom_runtime;
pub use loom_types;

mod bridge;
mod handler;
mod router;
mod state;

pub use bridge::{Bridge, SessionId};
pub use handler::handle_websocket;
pub use router::create_router;
pub use state::AppState;

/// Version of the loom_server crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
