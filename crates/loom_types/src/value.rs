//! Wire Value type that crosses the bridge
//!
//! Everything the backend and the frontend exchange is one of these. Plain data
//! travels structurally; backend objects with identity travel as a
//! [`RefHandle`] naming their registry entry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use ts_rs::TS;

/// Marker field that identifies a reference handle on the wire
pub const REF_MARKER: &str = "ref";

/// Wrapper key for mappings that would otherwise read back as something else
///
/// A mapping whose only key is [`REF_MARKER`] or [`MAP_ESCAPE`] travels as
/// `{"$map": {...}}`.
pub const MAP_ESCAPE: &str = "$map";

// ─────────────────────────────────────────────────────────────────────────────
// Reference Handles
// ─────────────────────────────────────────────────────────────────────────────

/// Wire token naming an exposed backend object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RefHandle {
    /// Public name of the object in the backend registry
    #[serde(rename = "ref")]
    pub public_name: String,
}

impl RefHandle {
    /// Create a handle for the given public name
    pub fn new(public_name: impl Into<String>) -> Self {
        Self {
            public_name: public_name.into(),
        }
    }
}

impl std::fmt::Display for RefHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.public_name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Value Type
// ─────────────────────────────────────────────────────────────────────────────

/// JSON-compatible value with reference handles recognized by the `ref` marker
///
/// Serialized as plain JSON. An object with exactly one key, `ref`, holding a
/// string is read back as [`Value::Ref`]; one with exactly one key, `$map`,
/// holding an object is an escaped mapping. Any other object is a mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    /// Null value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit integer
    Int(i64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Ordered sequence of values
    Array(Vec<Value>),
    /// Mapping from string keys to values
    Object(HashMap<String, Value>),
    /// Reference to an exposed backend object
    Ref(RefHandle),
}

// ─────────────────────────────────────────────────────────────────────────────
// Value Accessors
// ─────────────────────────────────────────────────────────────────────────────

impl Value {
    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 (also converts from float if lossless)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Get as f64 (also converts from int)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Get as string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as array reference
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Get as object fields reference
    pub fn as_object(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Get as reference handle
    pub fn as_ref_handle(&self) -> Option<&RefHandle> {
        match self {
            Value::Ref(handle) => Some(handle),
            _ => None,
        }
    }

    /// Get a field from an object
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|obj| obj.get(key))
    }

    /// Visit every reference handle contained in this value, depth first
    pub fn for_each_ref<F: FnMut(&RefHandle)>(&self, f: &mut F) {
        match self {
            Value::Ref(handle) => f(handle),
            Value::Array(items) => items.iter().for_each(|v| v.for_each_ref(f)),
            Value::Object(fields) => fields.values().for_each(|v| v.for_each_ref(f)),
            _ => {}
        }
    }

    /// Name of the value's shape, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Ref(_) => "ref",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// From Implementations
// ─────────────────────────────────────────────────────────────────────────────

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

impl From<RefHandle> for Value {
    fn from(h: RefHandle) -> Self {
        Value::Ref(h)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(fields: HashMap<String, Value>) -> Self {
        Value::Object(fields)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// serde_json::Value Interop
// ─────────────────────────────────────────────────────────────────────────────

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Null
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(mut obj) => {
                if obj.len() == 1 {
                    if let Some(serde_json::Value::String(name)) = obj.get(REF_MARKER) {
                        return Value::Ref(RefHandle::new(name.clone()));
                    }
                    if matches!(obj.get(MAP_ESCAPE), Some(serde_json::Value::Object(_))) {
                        if let Some(serde_json::Value::Object(inner)) = obj.remove(MAP_ESCAPE) {
                            obj = inner;
                        }
                    }
                }
                let fields = obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect();
                Value::Object(fields)
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::Number(i.into()),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Object(fields) => {
                let escape = needs_escape(&fields);
                let obj = serde_json::Value::Object(
                    fields
                        .into_iter()
                        .map(|(k, v)| (k, serde_json::Value::from(v)))
                        .collect(),
                );
                if escape {
                    let mut wrapper = serde_json::Map::new();
                    wrapper.insert(MAP_ESCAPE.to_string(), obj);
                    serde_json::Value::Object(wrapper)
                } else {
                    obj
                }
            }
            Value::Ref(h) => {
                let mut obj = serde_json::Map::new();
                obj.insert(REF_MARKER.to_string(), serde_json::Value::String(h.public_name));
                serde_json::Value::Object(obj)
            }
        }
    }
}

/// Whether a mapping would be misread as a reference or an escaped mapping
fn needs_escape(fields: &HashMap<String, Value>) -> bool {
    fields.len() == 1
        && (matches!(fields.get(REF_MARKER), Some(Value::String(_))) || fields.contains_key(MAP_ESCAPE))
}

// ─────────────────────────────────────────────────────────────────────────────
// TryFrom Implementations
// ─────────────────────────────────────────────────────────────────────────────

/// Error when converting from Value
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValueConversionError {
    #[error("Expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("Integer overflow")]
    IntegerOverflow,
}

impl TryFrom<Value> for bool {
    type Error = ValueConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        v.as_bool().ok_or(ValueConversionError::TypeMismatch {
            expected: "bool",
            actual: v.type_name(),
        })
    }
}

impl TryFrom<Value> for i64 {
    type Error = ValueConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        v.as_i64().ok_or(ValueConversionError::TypeMismatch {
            expected: "int",
            actual: v.type_name(),
        })
    }
}

impl TryFrom<Value> for i32 {
    type Error = ValueConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        let i = v.as_i64().ok_or(ValueConversionError::TypeMismatch {
            expected: "int",
            actual: v.type_name(),
        })?;
        i32::try_from(i).map_err(|_| ValueConversionError::IntegerOverflow)
    }
}

impl TryFrom<Value> for f64 {
    type Error = ValueConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        v.as_f64().ok_or(ValueConversionError::TypeMismatch {
            expected: "float",
            actual: v.type_name(),
        })
    }
}

impl TryFrom<Value> for String {
    type Error = ValueConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::String(s) => Ok(s),
            _ => Err(ValueConversionError::TypeMismatch {
                expected: "string",
                actual: v.type_name(),
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
