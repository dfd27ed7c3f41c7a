//! Demo context
//!
//! Two people, `fred` and `wilma`, served by `loom serve`.

use std::sync::Arc;

use loom_runtime::{Model, ModelError, ModelRef, ModelValue, Record, RegistryError};
use loom_server::Bridge;

/// A person record
///
/// `method(arg)` stores its argument in `called_with`; `birthday()` bumps
/// `age` and returns the new value.
pub fn person(name: &str, age: i64) -> Arc<Record> {
    Record::builder("Person")
        .attribute("name", name)
        .attribute("age", age)
        .attribute("spouse", ())
        .untyped("called_with", ())
        .method("method", |this, args| {
            let arg = args.into_iter().next().unwrap_or_default();
            this.set("called_with", arg)?;
            Ok(ModelValue::Null)
        })
        .method("birthday", |this, _| {
            let age = this
                .get("age")?
                .as_i64()
                .ok_or_else(|| ModelError::failed("age is not an integer"))?;
            this.set("age", ModelValue::from(age + 1))?;
            Ok(ModelValue::from(age + 1))
        })
        .method("greet", |this, args| {
            let name = this.get("name")?;
            let whom = args
                .first()
                .and_then(ModelValue::as_str)
                .unwrap_or("stranger")
                .to_string();
            Ok(ModelValue::from(format!(
                "Hello {whom}, I am {}",
                name.as_str().unwrap_or_default()
            )))
        })
        .build()
}

/// Root objects served by `loom serve`
///
/// The bridge only holds weak references; keep this alive while serving.
pub struct Demo {
    pub fred: Arc<Record>,
    pub wilma: Arc<Record>,
}

impl Default for Demo {
    fn default() -> Self {
        Self::new()
    }
}

impl Demo {
    pub fn new() -> Self {
        Self {
            fred: person("Fred", 40),
            wilma: person("Wilma", 38),
        }
    }

    /// Expose both people as context objects
    pub fn expose(&self, bridge: &Bridge) -> Result<(), RegistryError> {
        let fred: ModelRef = self.fred.clone();
        let wilma: ModelRef = self.wilma.clone();
        bridge.expose_context("fred", &fred)?;
        bridge.expose_context("wilma", &wilma)?;
        Ok(())
    }
}
