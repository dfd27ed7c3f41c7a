//! Loom - Live model bridge
//!
//! Application layer over the bridge crates: configuration, logging setup,
//! the in-process transport, and the demo context served by the `loom` binary.

pub mod config;
pub mod demo;
pub mod local;
pub mod logging;

pub use loom_client as client;
pub use loom_runtime as runtime;
pub use loom_server as server;
pub use loom_types as types;

pub use config::{BridgeConfig, ConfigError, LogConfig, LoomConfig, ServerConfig};
pub use local::connect_local;
