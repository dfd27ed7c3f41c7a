//! Error taxonomy carried by `error` messages

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Kind of failure reported across the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum ErrorKind {
    /// Malformed or unparseable message
    ProtocolError,
    /// Stale or unknown reference or registry name
    NotFoundError,
    /// Missing or unreadable attribute, unknown method, or type mismatch
    AttributeError,
    /// Write to a non-writable attribute
    ReadOnlyError,
    /// Failure raised by backend logic
    ApplicationError,
    /// Value has no wire representation
    UnmarshalableError,
    /// Client-side call timeout
    TimeoutError,
}

impl ErrorKind {
    /// Wire name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ProtocolError => "ProtocolError",
            ErrorKind::NotFoundError => "NotFoundError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::ReadOnlyError => "ReadOnlyError",
            ErrorKind::ApplicationError => "ApplicationError",
            ErrorKind::UnmarshalableError => "UnmarshalableError",
            ErrorKind::TimeoutError => "TimeoutError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error description as it travels on the wire
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct BridgeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl BridgeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFoundError, message)
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ApplicationError, message)
    }
}
