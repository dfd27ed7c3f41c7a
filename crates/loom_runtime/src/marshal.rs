//! Marshaller - Backend values to wire values and back
//!
//! Objects cross the boundary by reference: marshalling an object exposes it
//! (if needed) and emits a [`RefHandle`] carrying its public name. Everything
//! else is copied structurally.

use std::collections::HashMap;
use std::sync::Arc;

use loom_types::{BridgeError, ErrorKind, RefHandle, Value};

use crate::model::{ModelRef, ModelValue};
use crate::registry::{Registry, RegistryError};

/// Errors that can occur while marshalling
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarshalError {
    #[error("value has no wire representation: {0}")]
    Unmarshalable(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl MarshalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MarshalError::Unmarshalable(_) => ErrorKind::UnmarshalableError,
            MarshalError::Registry(err) => err.kind(),
        }
    }
}

impl From<MarshalError> for BridgeError {
    fn from(err: MarshalError) -> Self {
        BridgeError::new(err.kind(), err.to_string())
    }
}

/// Converts values crossing the bridge, sharing the bridge's registry
#[derive(Clone)]
pub struct Marshaller {
    registry: Arc<Registry>,
}

impl Marshaller {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handle for an object, exposing it on first use
    pub fn handle_for(&self, object: &ModelRef) -> RefHandle {
        RefHandle::new(self.registry.expose(object))
    }

    /// Convert a backend value into its wire form
    pub fn to_wire(&self, value: &ModelValue) -> Result<Value, MarshalError> {
        Ok(match value {
            ModelValue::Null => Value::Null,
            ModelValue::Bool(b) => Value::Bool(*b),
            ModelValue::Int(i) => Value::Int(*i),
            ModelValue::Float(f) if f.is_finite() => Value::Float(*f),
            ModelValue::Float(f) => {
                return Err(MarshalError::Unmarshalable(format!("non-finite float {f}")));
            }
            ModelValue::String(s) => Value::String(s.clone()),
            ModelValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.to_wire(item))
                    .collect::<Result<_, _>>()?,
            ),
            ModelValue::Map(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, item)| Ok((key.clone(), self.to_wire(item)?)))
                    .collect::<Result<_, MarshalError>>()?,
            ),
            ModelValue::Object(object) => Value::Ref(self.handle_for(object)),
            ModelValue::Opaque(desc) => return Err(MarshalError::Unmarshalable(desc.clone())),
        })
    }

    /// Convert a wire value into a backend value, resolving references
    pub fn from_wire(&self, value: &Value) -> Result<ModelValue, MarshalError> {
        Ok(match value {
            Value::Null => ModelValue::Null,
            Value::Bool(b) => ModelValue::Bool(*b),
            Value::Int(i) => ModelValue::Int(*i),
            Value::Float(f) => ModelValue::Float(*f),
            Value::String(s) => ModelValue::String(s.clone()),
            Value::Array(items) => ModelValue::List(
                items
                    .iter()
                    .map(|item| self.from_wire(item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(fields) => ModelValue::Map(
                fields
                    .iter()
                    .map(|(key, item)| Ok((key.clone(), self.from_wire(item)?)))
                    .collect::<Result<HashMap<_, _>, MarshalError>>()?,
            ),
            Value::Ref(handle) => ModelValue::Object(self.registry.resolve(&handle.public_name)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Record;

    fn marshaller() -> Marshaller {
        Marshaller::new(Arc::new(Registry::new()))
    }

    fn nested(depth: usize) -> ModelValue {
        if depth == 0 {
            return ModelValue::from(vec![
                ModelValue::Null,
                ModelValue::from(true),
                ModelValue::from(-3),
                ModelValue::from(2.5),
                ModelValue::from("leaf"),
            ]);
        }
        let mut map = HashMap::new();
        map.insert("inner".to_string(), nested(depth - 1));
        map.insert("count".to_string(), ModelValue::from(depth as i64));
        ModelValue::List(vec![ModelValue::Map(map), ModelValue::List(Vec::new())])
    }

    #[test]
    fn test_round_trip_values() {
        let m = marshaller();
        for depth in 0..=5 {
            let value = nested(depth);
            let wire = m.to_wire(&value).unwrap();
            assert_eq!(m.from_wire(&wire).unwrap(), value);
        }
    }

    #[test]
    fn test_mapping_with_ref_key_survives_the_wire() {
        let m = marshaller();
        let fred: ModelRef = Record::builder("Person").attribute("name", "Fred").build();
        m.registry().expose_as("main", &fred).unwrap();

        let mut fields = HashMap::new();
        fields.insert("ref".to_string(), ModelValue::from("main"));
        let value = ModelValue::Map(fields);

        let text = serde_json::to_string(&m.to_wire(&value).unwrap()).unwrap();
        let wire: Value = serde_json::from_str(&text).unwrap();
        assert!(wire.as_ref_handle().is_none());
        assert_eq!(m.from_wire(&wire).unwrap(), value);
    }

    #[test]
    fn test_objects_marshal_by_reference() {
        let m = marshaller();
        let fred: ModelRef = Record::builder("Person").attribute("name", "Fred").build();

        let first = m.to_wire(&ModelValue::Object(fred.clone())).unwrap();
        let second = m
            .to_wire(&ModelValue::from(vec![ModelValue::Object(fred.clone())]))
            .unwrap();

        let handle = first.as_ref_handle().unwrap().clone();
        assert_eq!(second.as_array().unwrap()[0].as_ref_handle(), Some(&handle));

        let back = m.from_wire(&first).unwrap();
        assert_eq!(back, ModelValue::Object(fred));
    }

    #[test]
    fn test_unmarshalable_values() {
        let m = marshaller();
        let err = m
            .to_wire(&ModelValue::from(vec![ModelValue::Opaque("socket".into())]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnmarshalableError);

        let err = m.to_wire(&ModelValue::Float(f64::INFINITY)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnmarshalableError);
    }

    #[test]
    fn test_stale_reference() {
        let m = marshaller();
        let err = m.from_wire(&Value::Ref(RefHandle::new("Person_9"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFoundError);

        let wire: BridgeError = err.into();
        assert_eq!(wire.kind, ErrorKind::NotFoundError);
    }
}
