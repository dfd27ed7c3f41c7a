//! Client error types

use std::time::Duration;

use loom_types::{BridgeError, ErrorKind};

/// Errors surfaced to callers of the client API
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    /// The server answered with an `error` message
    #[error("{0}")]
    Remote(BridgeError),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("call cancelled")]
    Cancelled,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("failed to connect: {0}")]
    Connect(String),
}

impl ClientError {
    /// Bridge error kind, for failures that have one
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Remote(err) => Some(err.kind),
            ClientError::Timeout(_) => Some(ErrorKind::TimeoutError),
            ClientError::Protocol(_) => Some(ErrorKind::ProtocolError),
            ClientError::ConnectionClosed | ClientError::Cancelled | ClientError::Connect(_) => None,
        }
    }
}

impl From<BridgeError> for ClientError {
    fn from(err: BridgeError) -> Self {
        ClientError::Remote(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind() {
        let remote = ClientError::from(BridgeError::application("boom"));
        assert_eq!(remote.kind(), Some(ErrorKind::ApplicationError));
        assert_eq!(remote.to_string(), "ApplicationError: boom");

        assert_eq!(
            ClientError::Timeout(Duration::from_millis(5)).kind(),
            Some(ErrorKind::TimeoutError)
        );
        assert_eq!(ClientError::ConnectionClosed.kind(), None);
    }
}
