//! Table-driven model
//!
//! A [`Record`] is a [`Model`] whose attributes and methods are registered at
//! construction time. It is the quickest way to put a backend object on the
//! bridge without writing a `Model` implementation by hand.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::model::{AttributeDef, Model, ModelError, ModelValue};
use crate::observe::Observers;

/// Method body registered on a record
pub type Method =
    Arc<dyn Fn(&Record, Vec<ModelValue>) -> Result<ModelValue, ModelError> + Send + Sync>;

struct Slot {
    value: ModelValue,
    writable: bool,
    typed: bool,
}

/// Backend object built from an attribute table and a method table
///
/// Assignments keep the shape of the current value: an `Int` is accepted where
/// a `Float` is stored, and attributes holding `Null` or an object accept
/// either. Attributes added with [`RecordBuilder::untyped`] accept anything.
/// A change notification is emitted only when the value changes.
pub struct Record {
    type_name: String,
    order: Vec<String>,
    slots: Mutex<HashMap<String, Slot>>,
    methods: HashMap<String, Method>,
    observers: Observers,
}

impl Record {
    /// Start building a record of the given type
    pub fn builder(type_name: impl Into<String>) -> RecordBuilder {
        RecordBuilder {
            type_name: type_name.into(),
            order: Vec::new(),
            slots: HashMap::new(),
            methods: HashMap::new(),
        }
    }

    /// Check a new value against the stored one and return what to store
    fn coerce(attribute: &str, current: &ModelValue, value: ModelValue) -> Result<ModelValue, ModelError> {
        use ModelValue as V;

        match (current, value) {
            (V::Float(_), V::Int(i)) => Ok(V::Float(i as f64)),
            (V::Null | V::Object(_), value @ (V::Null | V::Object(_))) => Ok(value),
            (current, value)
                if std::mem::discriminant(current) == std::mem::discriminant(&value) =>
            {
                Ok(value)
            }
            (current, value) => Err(ModelError::TypeMismatch {
                attribute: attribute.to_string(),
                expected: current.type_name(),
                actual: value.type_name(),
            }),
        }
    }
}

impl Model for Record {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn attributes(&self) -> Vec<AttributeDef> {
        let slots = self.slots.lock();
        self.order
            .iter()
            .filter_map(|name| {
                slots.get(name).map(|slot| AttributeDef {
                    name: name.clone(),
                    writable: slot.writable,
                })
            })
            .collect()
    }

    fn get(&self, attribute: &str) -> Result<ModelValue, ModelError> {
        self.slots
            .lock()
            .get(attribute)
            .map(|slot| slot.value.clone())
            .ok_or_else(|| ModelError::NoSuchAttribute(attribute.to_string()))
    }

    fn set(&self, attribute: &str, value: ModelValue) -> Result<(), ModelError> {
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(attribute)
            .ok_or_else(|| ModelError::NoSuchAttribute(attribute.to_string()))?;
        if !slot.writable {
            return Err(ModelError::ReadOnly(attribute.to_string()));
        }

        let value = if slot.typed {
            Self::coerce(attribute, &slot.value, value)?
        } else {
            value
        };
        if slot.value == value {
            return Ok(());
        }
        slot.value = value.clone();

        // Still under the slot lock: observers see changes in mutation order.
        self.observers.notify(attribute, &value);
        Ok(())
    }

    fn invoke(&self, method: &str, args: Vec<ModelValue>) -> Result<ModelValue, ModelError> {
        let body = self
            .methods
            .get(method)
            .ok_or_else(|| ModelError::NoSuchMethod(method.to_string()))?;
        body(self, args)
    }

    fn observers(&self) -> Option<&Observers> {
        Some(&self.observers)
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("type_name", &self.type_name)
            .field("attributes", &self.order)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for [`Record`]
pub struct RecordBuilder {
    type_name: String,
    order: Vec<String>,
    slots: HashMap<String, Slot>,
    methods: HashMap<String, Method>,
}

impl RecordBuilder {
    /// Add a writable attribute with its initial value
    pub fn attribute(self, name: impl Into<String>, value: impl Into<ModelValue>) -> Self {
        self.slot(name.into(), Slot { value: value.into(), writable: true, typed: true })
    }

    /// Add a writable attribute that accepts values of any shape
    pub fn untyped(self, name: impl Into<String>, value: impl Into<ModelValue>) -> Self {
        self.slot(name.into(), Slot { value: value.into(), writable: true, typed: false })
    }

    /// Add a read-only attribute
    pub fn read_only(self, name: impl Into<String>, value: impl Into<ModelValue>) -> Self {
        self.slot(name.into(), Slot { value: value.into(), writable: false, typed: true })
    }

    /// Add a method
    pub fn method<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Record, Vec<ModelValue>) -> Result<ModelValue, ModelError> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(body));
        self
    }

    fn slot(mut self, name: String, slot: Slot) -> Self {
        if !self.slots.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.slots.insert(name, slot);
        self
    }

    pub fn build(self) -> Arc<Record> {
        Arc::new(Record {
            type_name: self.type_name,
            order: self.order,
            slots: Mutex::new(self.slots),
            methods: self.methods,
            observers: Observers::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> Arc<Record> {
        Record::builder("Person")
            .attribute("name", "Fred")
            .attribute("age", 40)
            .attribute("weight", 80.5)
            .attribute("spouse", ())
            .untyped("note", ())
            .read_only("id", 7)
            .method("greet", |this, args| {
                let name = this.get("name")?;
                let whom = args.first().and_then(|a| a.as_str()).unwrap_or("world");
                Ok(ModelValue::from(format!(
                    "{} greets {}",
                    name.as_str().unwrap_or_default(),
                    whom
                )))
            })
            .method("fail", |_, _| Err(ModelError::failed("backend exploded")))
            .build()
    }

    #[test]
    fn test_get_and_set() {
        let fred = person();
        assert_eq!(fred.get("age").unwrap(), ModelValue::from(40));

        fred.set("age", ModelValue::from(41)).unwrap();
        assert_eq!(fred.get("age").unwrap(), ModelValue::from(41));
    }

    #[test]
    fn test_unknown_names() {
        let fred = person();
        assert!(matches!(fred.get("height"), Err(ModelError::NoSuchAttribute(_))));
        assert!(matches!(
            fred.set("height", ModelValue::from(1)),
            Err(ModelError::NoSuchAttribute(_))
        ));
        assert!(matches!(fred.invoke("dance", vec![]), Err(ModelError::NoSuchMethod(_))));
    }

    #[test]
    fn test_read_only() {
        let fred = person();
        assert!(matches!(fred.set("id", ModelValue::from(8)), Err(ModelError::ReadOnly(_))));
        assert_eq!(fred.get("id").unwrap(), ModelValue::from(7));
    }

    #[test]
    fn test_type_checks() {
        let fred = person();
        assert!(matches!(
            fred.set("age", ModelValue::from("old")),
            Err(ModelError::TypeMismatch { expected: "int", actual: "string", .. })
        ));

        fred.set("weight", ModelValue::from(81)).unwrap();
        assert_eq!(fred.get("weight").unwrap(), ModelValue::Float(81.0));

        let wilma = Record::builder("Person").attribute("name", "Wilma").build();
        fred.set("spouse", ModelValue::from(wilma.clone())).unwrap();
        assert_eq!(fred.get("spouse").unwrap(), ModelValue::from(wilma));
        fred.set("spouse", ModelValue::Null).unwrap();

        fred.set("note", ModelValue::from("anything")).unwrap();
        fred.set("note", ModelValue::from(vec![1, 2])).unwrap();
        assert_eq!(fred.get("note").unwrap(), ModelValue::from(vec![1, 2]));
    }

    #[test]
    fn test_methods() {
        let fred = person();
        let greeting = fred.invoke("greet", vec![ModelValue::from("Barney")]).unwrap();
        assert_eq!(greeting.as_str(), Some("Fred greets Barney"));

        let err = fred.invoke("fail", vec![]).unwrap_err();
        assert_eq!(err.to_string(), "backend exploded");
    }

    #[test]
    fn test_notifies_only_on_change() {
        let fred = person();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        fred.subscribe(
            "age",
            Arc::new(move |_: &str, value: &ModelValue| sink.lock().push(value.clone())),
        )
        .unwrap();

        fred.set("age", ModelValue::from(41)).unwrap();
        fred.set("age", ModelValue::from(41)).unwrap();
        fred.set("age", ModelValue::from(42)).unwrap();
        fred.set("name", ModelValue::from("Frederick")).unwrap();

        assert_eq!(*seen.lock(), vec![ModelValue::from(41), ModelValue::from(42)]);
    }

    #[test]
    fn test_attribute_order() {
        let names: Vec<_> = person().attributes().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["name", "age", "weight", "spouse", "note", "id"]);
    }
}
