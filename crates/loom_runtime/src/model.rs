//! Backend Object Model
//!
//! The capability interface the bridge uses to reach into backend objects:
//! attribute lookup, assignment and method invocation by name, plus the
//! optional change-subscription capability.

use std::collections::HashMap;
use std::sync::Arc;

use loom_types::{BridgeError, ErrorKind};

use crate::observe::{ChangeCallback, Observers, SubscriptionId};

/// Shared handle to a backend object; the allocation is its identity
pub type ModelRef = Arc<dyn Model>;

// ─────────────────────────────────────────────────────────────────────────────
// Model Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by backend objects
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    #[error("no attribute '{0}'")]
    NoSuchAttribute(String),

    #[error("no method '{0}'")]
    NoSuchMethod(String),

    #[error("attribute '{0}' is read-only")]
    ReadOnly(String),

    #[error("attribute '{attribute}' expects {expected}, got {actual}")]
    TypeMismatch {
        attribute: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{0}")]
    Failed(String),
}

impl ModelError {
    /// Shorthand for a failure raised by application logic
    pub fn failed(message: impl Into<String>) -> Self {
        ModelError::Failed(message.into())
    }

    /// Wire error kind for this failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModelError::NoSuchAttribute(_)
            | ModelError::NoSuchMethod(_)
            | ModelError::TypeMismatch { .. } => ErrorKind::AttributeError,
            ModelError::ReadOnly(_) => ErrorKind::ReadOnlyError,
            ModelError::Failed(_) => ErrorKind::ApplicationError,
        }
    }
}

impl From<ModelError> for BridgeError {
    fn from(err: ModelError) -> Self {
        BridgeError::new(err.kind(), err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Attribute Definition
// ─────────────────────────────────────────────────────────────────────────────

/// Description of an attribute a model exposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDef {
    pub name: String,
    pub writable: bool,
}

impl AttributeDef {
    pub fn writable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            writable: true,
        }
    }

    pub fn read_only(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            writable: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Model Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Capability interface implemented by every object the bridge can expose
///
/// Implementations may be hand-written, table driven (see [`crate::Record`]),
/// or generated. Unknown names must fail with [`ModelError::NoSuchAttribute`]
/// or [`ModelError::NoSuchMethod`].
pub trait Model: Send + Sync + 'static {
    /// Type name, used for generated public names and diagnostics
    fn type_name(&self) -> &str;

    /// Attributes this object declares
    fn attributes(&self) -> Vec<AttributeDef>;

    /// Read an attribute
    fn get(&self, attribute: &str) -> Result<ModelValue, ModelError>;

    /// Assign an attribute
    fn set(&self, attribute: &str, value: ModelValue) -> Result<(), ModelError>;

    /// Invoke a method
    fn invoke(&self, method: &str, args: Vec<ModelValue>) -> Result<ModelValue, ModelError>;

    /// Change-subscription bookkeeping, if this object reports mutations
    fn observers(&self) -> Option<&Observers> {
        None
    }

    /// Subscribe to changes of one attribute
    ///
    /// Returns `None` if the object cannot report changes.
    fn subscribe(&self, attribute: &str, callback: ChangeCallback) -> Option<SubscriptionId> {
        self.observers()
            .map(|observers| observers.subscribe(attribute, callback))
    }

    /// Drop a subscription made with [`Model::subscribe`]
    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers()
            .is_some_and(|observers| observers.unsubscribe(id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Values
// ─────────────────────────────────────────────────────────────────────────────

/// Backend-native value
///
/// Unlike the wire [`loom_types::Value`], this can hold live objects with
/// identity and native resources that have no wire representation.
#[derive(Clone, Default)]
pub enum ModelValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ModelValue>),
    Map(HashMap<String, ModelValue>),
    /// Live backend object, marshalled by reference
    Object(ModelRef),
    /// Native resource with no wire form (file handle, socket, ...)
    Opaque(String),
}

impl ModelValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ModelValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ModelValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ModelValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ModelValue::Float(f) => Some(*f),
            ModelValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ModelValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ModelRef> {
        match self {
            ModelValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Name of the value's shape, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            ModelValue::Null => "null",
            ModelValue::Bool(_) => "bool",
            ModelValue::Int(_) => "int",
            ModelValue::Float(_) => "float",
            ModelValue::String(_) => "string",
            ModelValue::List(_) => "list",
            ModelValue::Map(_) => "map",
            ModelValue::Object(_) => "object",
            ModelValue::Opaque(_) => "opaque",
        }
    }
}

/// Structural equality for data, identity for objects
impl PartialEq for ModelValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ModelValue::Null, ModelValue::Null) => true,
            (ModelValue::Bool(a), ModelValue::Bool(b)) => a == b,
            (ModelValue::Int(a), ModelValue::Int(b)) => a == b,
            (ModelValue::Float(a), ModelValue::Float(b)) => a == b,
            (ModelValue::String(a), ModelValue::String(b)) => a == b,
            (ModelValue::List(a), ModelValue::List(b)) => a == b,
            (ModelValue::Map(a), ModelValue::Map(b)) => a == b,
            (ModelValue::Object(a), ModelValue::Object(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            (ModelValue::Opaque(a), ModelValue::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Debug for ModelValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelValue::Null => f.write_str("Null"),
            ModelValue::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            ModelValue::Int(i) => f.debug_tuple("Int").field(i).finish(),
            ModelValue::Float(x) => f.debug_tuple("Float").field(x).finish(),
            ModelValue::String(s) => f.debug_tuple("String").field(s).finish(),
            ModelValue::List(items) => f.debug_tuple("List").field(items).finish(),
            ModelValue::Map(fields) => f.debug_tuple("Map").field(fields).finish(),
            ModelValue::Object(obj) => {
                write!(f, "Object({}@{:p})", obj.type_name(), Arc::as_ptr(obj))
            }
            ModelValue::Opaque(desc) => f.debug_tuple("Opaque").field(desc).finish(),
        }
    }
}

impl From<()> for ModelValue {
    fn from(_: ()) -> Self {
        ModelValue::Null
    }
}

impl From<bool> for ModelValue {
    fn from(v: bool) -> Self {
        ModelValue::Bool(v)
    }
}

impl From<i32> for ModelValue {
    fn from(v: i32) -> Self {
        ModelValue::Int(v as i64)
    }
}

impl From<i64> for ModelValue {
    fn from(v: i64) -> Self {
        ModelValue::Int(v)
    }
}

impl From<f64> for ModelValue {
    fn from(v: f64) -> Self {
        ModelValue::Float(v)
    }
}

impl From<&str> for ModelValue {
    fn from(v: &str) -> Self {
        ModelValue::String(v.to_string())
    }
}

impl From<String> for ModelValue {
    fn from(v: String) -> Self {
        ModelValue::String(v)
    }
}

impl<T: Into<ModelValue>> From<Vec<T>> for ModelValue {
    fn from(v: Vec<T>) -> Self {
        ModelValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<ModelRef> for ModelValue {
    fn from(obj: ModelRef) -> Self {
        ModelValue::Object(obj)
    }
}

impl<M: Model> From<Arc<M>> for ModelValue {
    fn from(obj: Arc<M>) -> Self {
        ModelValue::Object(obj)
    }
}
