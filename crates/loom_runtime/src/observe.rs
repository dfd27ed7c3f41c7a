//! Attribute change subscriptions
//!
//! Bookkeeping a model embeds to offer the subscribe/unsubscribe capability.
//! Callbacks run synchronously inside [`Observers::notify`], so a model that
//! notifies while still holding its state lock delivers changes in mutation
//! order.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::model::ModelValue;

/// Callback invoked with `(attribute, new_value)` after a watched attribute changes
pub type ChangeCallback = Arc<dyn Fn(&str, &ModelValue) + Send + Sync>;

/// Handle returned by a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscription {
    id: SubscriptionId,
    callback: ChangeCallback,
}

/// Per-object table of attribute subscriptions
#[derive(Default)]
pub struct Observers {
    next_id: AtomicU64,
    by_attribute: RwLock<HashMap<String, Vec<Subscription>>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for one attribute
    pub fn subscribe(&self, attribute: &str, callback: ChangeCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.by_attribute
            .write()
            .entry(attribute.to_string())
            .or_default()
            .push(Subscription { id, callback });
        id
    }

    /// Remove a subscription; returns false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut table = self.by_attribute.write();
        for subs in table.values_mut() {
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                subs.remove(pos);
                return true;
            }
        }
        false
    }

    /// Report a change to every subscriber of `attribute`
    pub fn notify(&self, attribute: &str, value: &ModelValue) {
        // Clone the callbacks out so a callback may subscribe or unsubscribe.
        let callbacks: Vec<ChangeCallback> = match self.by_attribute.read().get(attribute) {
            Some(subs) => subs.iter().map(|s| s.callback.clone()).collect(),
            None => return,
        };
        for callback in callbacks {
            callback(attribute, value);
        }
    }

    /// Number of live subscriptions across all attributes
    pub fn len(&self) -> usize {
        self.by_attribute.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers").field("subscriptions", &self.len()).finish()
    }
}
