//! Proxies
//!
//! A [`Proxy`] mirrors one exposed backend object. Reads are served from the
//! local cache when possible; writes and method calls become bridge requests.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use loom_types::{ClientMessage, RefHandle, Value};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::client::ClientInner;
use crate::error::ClientError;
use crate::pending::PendingCall;

/// Capacity of each proxy's event stream
const EVENT_CAPACITY: usize = 64;

/// Attribute update delivered to observers of a proxy
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyEvent {
    pub attribute: String,
    pub value: Value,
}

/// Cached attribute values
#[derive(Default)]
struct Cache {
    values: HashMap<String, Value>,
    /// Notifications applied so far, per attribute
    notified: HashMap<String, u64>,
}

impl Cache {
    fn version(&self, attribute: &str) -> u64 {
        self.notified.get(attribute).copied().unwrap_or(0)
    }
}

/// Shared state behind every handle to one proxy
pub(crate) struct ProxyState {
    public_name: String,
    cache: Mutex<Cache>,
    events: broadcast::Sender<ProxyEvent>,
}

impl ProxyState {
    pub(crate) fn new(public_name: &str) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            public_name: public_name.to_string(),
            cache: Mutex::new(Cache::default()),
            events,
        })
    }

    /// Apply a change notification
    pub(crate) fn apply(&self, attribute: &str, value: Value) {
        {
            let mut cache = self.cache.lock();
            cache.values.insert(attribute.to_string(), value.clone());
            *cache.notified.entry(attribute.to_string()).or_insert(0) += 1;
        }
        // No subscribers is fine: nobody is rendering this proxy.
        let _ = self.events.send(ProxyEvent {
            attribute: attribute.to_string(),
            value,
        });
    }
}

/// Frontend mirror of one exposed backend object
///
/// Cheap to clone; all clones share one cache. A client never holds two
/// proxies for the same public name.
#[derive(Clone)]
pub struct Proxy {
    state: Arc<ProxyState>,
    client: Weak<ClientInner>,
}

impl Proxy {
    pub(crate) fn new(state: Arc<ProxyState>, client: Weak<ClientInner>) -> Self {
        Self { state, client }
    }

    pub fn public_name(&self) -> &str {
        &self.state.public_name
    }

    /// Reference handle naming this object on the wire
    pub fn handle(&self) -> RefHandle {
        RefHandle::new(self.state.public_name.clone())
    }

    /// Whether two proxies mirror the same object in the same client
    pub fn same_as(&self, other: &Proxy) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Last known value of an attribute, without any network traffic
    pub fn cached(&self, attribute: &str) -> Option<Value> {
        self.state.cache.lock().values.get(attribute).cloned()
    }

    /// Read an attribute, from cache if possible
    pub async fn get(&self, attribute: &str) -> Result<Value, ClientError> {
        if let Some(value) = self.cached(attribute) {
            return Ok(value);
        }
        let value = self.fetch(attribute).await?;
        Ok(self.remember(attribute, value))
    }

    /// Blocking form of [`get`](Proxy::get); must not be called from async code
    pub fn get_blocking(&self, attribute: &str) -> Result<Value, ClientError> {
        if let Some(value) = self.cached(attribute) {
            return Ok(value);
        }
        let value = self.fetch(attribute).wait()?;
        Ok(self.remember(attribute, value))
    }

    /// Assign an attribute; the cache changes only if the server accepts it
    ///
    /// A change notification for the attribute that lands while the request
    /// is in flight is newer than the written value and wins.
    pub async fn set(&self, attribute: &str, value: impl Into<Value>) -> Result<(), ClientError> {
        let value = value.into();
        let seen = self.state.cache.lock().version(attribute);
        self.store(attribute, value.clone()).await?;
        self.settle(attribute, seen, value);
        Ok(())
    }

    /// Blocking form of [`set`](Proxy::set); must not be called from async code
    pub fn set_blocking(&self, attribute: &str, value: impl Into<Value>) -> Result<(), ClientError> {
        let value = value.into();
        let seen = self.state.cache.lock().version(attribute);
        self.store(attribute, value.clone()).wait()?;
        self.settle(attribute, seen, value);
        Ok(())
    }

    /// Invoke a method, returning immediately with a handle to the result
    pub fn call(&self, method: &str, args: Vec<Value>) -> PendingCall {
        let target = self.handle();
        let method = method.to_string();
        self.request(move |id| ClientMessage::CallMethod {
            id,
            target,
            method,
            args,
        })
    }

    /// Invoke a method and block until it completes; must not be called from async code
    pub fn call_blocking(&self, method: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        self.call(method, args).wait()
    }

    /// Forget the cached value of one attribute
    pub fn invalidate(&self, attribute: &str) {
        self.state.cache.lock().values.remove(attribute);
    }

    /// Forget every cached value
    pub fn invalidate_all(&self) {
        self.state.cache.lock().values.clear();
    }

    /// Stream of attribute updates applied from change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.state.events.subscribe()
    }

    fn fetch(&self, attribute: &str) -> PendingCall {
        let target = self.handle();
        let attribute = attribute.to_string();
        self.request(move |id| ClientMessage::GetAttribute {
            id,
            target,
            attribute,
        })
    }

    fn store(&self, attribute: &str, value: Value) -> PendingCall {
        let target = self.handle();
        let attribute = attribute.to_string();
        self.request(move |id| ClientMessage::SetAttribute {
            id,
            target,
            attribute,
            value,
        })
    }

    /// Cache a fetched value unless a notification got there first
    fn remember(&self, attribute: &str, value: Value) -> Value {
        self.state
            .cache
            .lock()
            .values
            .entry(attribute.to_string())
            .or_insert(value)
            .clone()
    }

    /// Cache a written value unless a notification arrived since `seen`
    fn settle(&self, attribute: &str, seen: u64, value: Value) {
        let mut cache = self.state.cache.lock();
        if cache.version(attribute) == seen {
            cache.values.insert(attribute.to_string(), value);
        }
    }

    fn request(&self, build: impl FnOnce(u64) -> ClientMessage) -> PendingCall {
        match self.client.upgrade() {
            Some(client) => client.request(build),
            None => PendingCall::failed(ClientError::ConnectionClosed),
        }
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("public_name", &self.state.public_name)
            .field("cached", &self.state.cache.lock().values.len())
            .finish()
    }
}
