//! Object Registry - Stable public names for exposed backend objects
//!
//! The registry maps an object's identity (its allocation) to a public name
//! and back. It only holds weak references, so exposing an object never keeps
//! it alive. A name, once handed out, is never given to a different object for
//! the lifetime of the registry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use loom_types::{BridgeError, ErrorKind};
use parking_lot::RwLock;

use crate::model::{Model, ModelRef};

/// Default separator between type name and ordinal in generated names
pub const DEFAULT_NAME_SEPARATOR: &str = "_";

/// Identity of a backend object: the address of its allocation
pub fn identity(object: &ModelRef) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur when working with the registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no live object named '{0}'")]
    NotFound(String),

    #[error("name '{0}' already belongs to another object")]
    NameTaken(String),

    #[error("object is already exposed as '{0}'")]
    AlreadyExposed(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::NotFound(_) => ErrorKind::NotFoundError,
            RegistryError::NameTaken(_) | RegistryError::AlreadyExposed(_) => {
                ErrorKind::ApplicationError
            }
        }
    }
}

impl From<RegistryError> for BridgeError {
    fn from(err: RegistryError) -> Self {
        BridgeError::new(err.kind(), err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

struct Entry {
    identity: usize,
    object: Weak<dyn Model>,
}

impl Entry {
    /// Upgrade if the object is still alive
    fn live(&self) -> Option<ModelRef> {
        self.object.upgrade()
    }
}

#[derive(Default)]
struct RegistryInner {
    by_identity: HashMap<usize, String>,
    by_name: HashMap<String, Entry>,
    /// Every name ever handed out, live or not
    issued: HashSet<String>,
    /// Next ordinal per type name
    ordinals: HashMap<String, u64>,
}

impl RegistryInner {
    fn insert(&mut self, name: String, object: &ModelRef) {
        let identity = identity(object);
        self.by_identity.insert(identity, name.clone());
        self.issued.insert(name.clone());
        self.by_name.insert(
            name,
            Entry {
                identity,
                object: Arc::downgrade(object),
            },
        );
    }

    fn remove_name(&mut self, name: &str) -> Option<Entry> {
        let entry = self.by_name.remove(name)?;
        self.by_identity.remove(&entry.identity);
        Some(entry)
    }

    /// Live name of an object, dropping the mapping if it went stale
    fn live_name(&mut self, object: &ModelRef) -> Option<String> {
        let name = self.by_identity.get(&identity(object))?.clone();
        let same = self
            .by_name
            .get(&name)
            .and_then(Entry::live)
            .is_some_and(|live| std::ptr::addr_eq(Arc::as_ptr(&live), Arc::as_ptr(object)));
        if same {
            Some(name)
        } else {
            self.remove_name(&name);
            None
        }
    }

    fn generate_name(&mut self, type_name: &str, separator: &str) -> String {
        let ordinal = self.ordinals.entry(type_name.to_string()).or_insert(0);
        loop {
            *ordinal += 1;
            let candidate = format!("{type_name}{separator}{ordinal}");
            if !self.issued.contains(&candidate) {
                return candidate;
            }
        }
    }
}

/// Process-scoped table of exposed objects
///
/// Construct one per bridge and pass it explicitly; there is no global instance.
pub struct Registry {
    inner: RwLock<RegistryInner>,
    separator: String,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::with_separator(DEFAULT_NAME_SEPARATOR)
    }

    /// Create a registry whose generated names use `separator`
    pub fn with_separator(separator: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            separator: separator.into(),
        }
    }

    /// Expose an object, returning its public name
    ///
    /// Idempotent: the same object always gets the same name back. The first
    /// exposure allocates `<type_name><separator><ordinal>`.
    pub fn expose(&self, object: &ModelRef) -> String {
        let mut inner = self.inner.write();
        if let Some(name) = inner.live_name(object) {
            return name;
        }

        let name = inner.generate_name(object.type_name(), &self.separator);
        inner.insert(name.clone(), object);
        tracing::debug!(public_name = %name, type_name = object.type_name(), "Exposed object");
        name
    }

    /// Expose an object under a caller-chosen name
    ///
    /// Fails if the name was ever issued to a different object, or if the
    /// object is already exposed under another name.
    pub fn expose_as(&self, name: &str, object: &ModelRef) -> Result<String, RegistryError> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.live_name(object) {
            return if existing == name {
                Ok(existing)
            } else {
                Err(RegistryError::AlreadyExposed(existing))
            };
        }
        if inner.issued.contains(name) {
            return Err(RegistryError::NameTaken(name.to_string()));
        }

        inner.insert(name.to_string(), object);
        tracing::debug!(public_name = %name, type_name = object.type_name(), "Exposed object");
        Ok(name.to_string())
    }

    /// Look up a live object by public name
    pub fn resolve(&self, name: &str) -> Result<ModelRef, RegistryError> {
        {
            let inner = self.inner.read();
            match inner.by_name.get(name) {
                Some(entry) => {
                    if let Some(object) = entry.live() {
                        return Ok(object);
                    }
                }
                None => return Err(RegistryError::NotFound(name.to_string())),
            }
        }

        // The object was dropped; forget the mapping but keep the name retired.
        self.inner.write().remove_name(name);
        Err(RegistryError::NotFound(name.to_string()))
    }

    /// Public name of an object, without exposing it
    pub fn name_of(&self, object: &ModelRef) -> Option<String> {
        self.inner.write().live_name(object)
    }

    /// Remove an object's mapping; a no-op if it was never exposed
    ///
    /// Returns the name the object was exposed under.
    pub fn unexpose(&self, object: &ModelRef) -> Option<String> {
        let mut inner = self.inner.write();
        let name = inner.by_identity.get(&identity(object))?.clone();
        inner.remove_name(&name);
        tracing::debug!(public_name = %name, "Unexposed object");
        Some(name)
    }

    /// Drop mappings whose objects no longer exist, returning their names
    pub fn prune(&self) -> Vec<String> {
        let mut inner = self.inner.write();
        let dead: Vec<String> = inner
            .by_name
            .iter()
            .filter(|(_, entry)| entry.live().is_none())
            .map(|(name, _)| name.clone())
            .collect();
        for name in &dead {
            inner.remove_name(name);
        }
        dead
    }

    /// Drop every mapping; issued names stay retired
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_name.clear();
        inner.by_identity.clear();
    }

    /// Names of all current mappings
    pub fn names(&self) -> Vec<String> {
        self.inner.read().by_name.keys().cloned().collect()
    }

    /// Number of current mappings
    pub fn len(&self) -> usize {
        self.inner.read().by_name.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
