//! Server Application State
//!
//! Shared state accessible by all WebSocket handlers.

use std::sync::Arc;

use crate::bridge::Bridge;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    bridge: Arc<Bridge>,
}

impl AppState {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// Number of open sessions
    pub fn session_count(&self) -> usize {
        self.bridge.session_count()
    }

    /// Number of live registry mappings
    pub fn exposed_count(&self) -> usize {
        self.bridge.registry().len()
    }
}
