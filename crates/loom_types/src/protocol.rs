//! Bridge Protocol Messages
//!
//! Defines the message types exchanged between the bridge client and server.
//! Each message is one JSON object tagged by its `type` field.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{BridgeError, ErrorKind, RefHandle, Value};

/// Correlation id pairing a request with its terminal response
pub type CallId = u64;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Read an attribute of an exposed object
    GetAttribute {
        id: CallId,
        target: RefHandle,
        attribute: String,
    },

    /// Assign an attribute of an exposed object
    SetAttribute {
        id: CallId,
        target: RefHandle,
        attribute: String,
        #[ts(type = "unknown")]
        value: Value,
    },

    /// Invoke a method of an exposed object
    CallMethod {
        id: CallId,
        target: RefHandle,
        method: String,
        #[serde(default)]
        #[ts(type = "unknown[]")]
        args: Vec<Value>,
    },

    /// Fetch the named root objects the server was started with
    GetContext { id: CallId },

    /// Stop mirroring an object in this session
    Release { target: RefHandle },
}

impl ClientMessage {
    /// Correlation id, if this message expects a response
    pub fn id(&self) -> Option<CallId> {
        match self {
            ClientMessage::GetAttribute { id, .. }
            | ClientMessage::SetAttribute { id, .. }
            | ClientMessage::CallMethod { id, .. }
            | ClientMessage::GetContext { id } => Some(*id),
            ClientMessage::Release { .. } => None,
        }
    }

    /// Object targeted by this message
    pub fn target(&self) -> Option<&RefHandle> {
        match self {
            ClientMessage::GetAttribute { target, .. }
            | ClientMessage::SetAttribute { target, .. }
            | ClientMessage::CallMethod { target, .. }
            | ClientMessage::Release { target } => Some(target),
            ClientMessage::GetContext { .. } => None,
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once when a session opens
    Connected {
        session_id: String,
        server_version: String,
    },

    /// Successful terminal response to a request
    CallResult {
        id: CallId,
        #[ts(type = "unknown")]
        value: Value,
    },

    /// Failed terminal response, or a protocol failure without a usable id
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<CallId>,
        kind: ErrorKind,
        message: String,
    },

    /// Unsolicited push of a watched attribute's new value
    ChangeNotification {
        target: RefHandle,
        attribute: String,
        #[ts(type = "unknown")]
        value: Value,
    },
}

impl ServerMessage {
    /// Create a success response
    pub fn result(id: CallId, value: Value) -> Self {
        Self::CallResult { id, value }
    }

    /// Create an error response
    pub fn error(id: Option<CallId>, error: BridgeError) -> Self {
        Self::Error {
            id,
            kind: error.kind,
            message: error.message,
        }
    }

    /// Create a response from an operation outcome
    pub fn outcome(id: CallId, outcome: Result<Value, BridgeError>) -> Self {
        match outcome {
            Ok(value) => Self::result(id, value),
            Err(error) => Self::error(Some(id), error),
        }
    }

    /// Create a change notification
    pub fn change(target: RefHandle, attribute: impl Into<String>, value: Value) -> Self {
        Self::ChangeNotification {
            target,
            attribute: attribute.into(),
            value,
        }
    }

    /// Create a connected message
    pub fn connected(session_id: impl Into<String>) -> Self {
        Self::Connected {
            session_id: session_id.into(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Recover the correlation id from a message that failed to parse
///
/// Returns the numeric `id` field if the text is still a JSON object carrying one.
pub fn best_effort_id(text: &str) -> Option<CallId> {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()?
        .get("id")?
        .as_u64()
}
