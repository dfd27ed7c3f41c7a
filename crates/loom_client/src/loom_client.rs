//! Loom Client - Frontend endpoint of the model bridge
//!
//! Keeps one [`Proxy`] per mirrored backend object, turns attribute access and
//! method calls into bridge requests, and applies change notifications to the
//! proxies' caches.
//!
//! The client is transport independent: [`Client::new`] hands back the
//! outbound message stream and inbound messages are fed through
//! [`Client::handle_message`]. [`connect`] wires it to a WebSocket.

pub use loom_types;

mod client;
mod error;
mod pending;
mod proxy;
mod transport;

pub use client::{Client, ClientConfig, WeakClient};
pub use error::ClientError;
pub use pending::PendingCall;
pub use proxy::{Proxy, ProxyEvent};
pub use transport::connect;
