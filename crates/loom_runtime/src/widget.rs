//! Widget mounts
//!
//! Factories for native sub-panels embedded next to a bridged object, keyed by
//! `(public_name, attribute)`. The bridge never looks inside a widget.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Opaque embeddable widget produced by a factory
pub type Widget = Box<dyn Any + Send>;

/// Factory registered for one object attribute
pub type WidgetFactory = Arc<dyn Fn(&WidgetArgs) -> Widget + Send + Sync>;

/// String arguments passed to a widget factory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WidgetArgs(HashMap<String, String>);

/// Requested widget size; absent when not given or not an integer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WidgetSize {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl WidgetArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn get_int(&self, key: &str) -> Option<u32> {
        self.get(key)?.trim().parse().ok()
    }

    pub fn size(&self) -> WidgetSize {
        WidgetSize {
            width: self.get_int("width"),
            height: self.get_int("height"),
        }
    }
}

impl From<HashMap<String, String>> for WidgetArgs {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

/// Registered widget factories
#[derive(Default)]
pub struct WidgetMounts {
    factories: RwLock<HashMap<(String, String), WidgetFactory>>,
}

impl WidgetMounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; replaces any existing one for the same key
    pub fn register<F>(&self, public_name: &str, attribute: &str, factory: F)
    where
        F: Fn(&WidgetArgs) -> Widget + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert((public_name.to_string(), attribute.to_string()), Arc::new(factory));
    }

    /// Build a widget, or `None` if nothing is registered for the key
    pub fn create_widget(&self, public_name: &str, attribute: &str, args: &WidgetArgs) -> Option<Widget> {
        let factory = self
            .factories
            .read()
            .get(&(public_name.to_string(), attribute.to_string()))
            .cloned()?;
        Some(factory(args))
    }

    /// Drop every factory registered for an object
    pub fn unregister_object(&self, public_name: &str) -> usize {
        let mut factories = self.factories.write();
        let before = factories.len();
        factories.retain(|(name, _), _| name != public_name);
        before - factories.len()
    }

    pub fn clear(&self) {
        self.factories.write().clear();
    }

    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for WidgetMounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetMounts").field("factories", &self.len()).finish()
    }
}
