//! Bridge client session
//!
//! Owns the proxies and the pending-call table of one session. Inbound
//! messages are applied in the order they are fed in; callers waiting on a
//! call wait on that call's entry only, never on the transport.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use loom_types::{BridgeError, CallId, ClientMessage, RefHandle, ServerMessage, Value};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use crate::error::ClientError;
use crate::pending::{PendingCall, PendingCalls};
use crate::proxy::{Proxy, ProxyState};

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Per-call timeout; calls wait indefinitely when unset
    pub call_timeout_ms: Option<u64>,

    /// Timeout for establishing a transport connection
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: None,
            connect_timeout_ms: 5_000,
        }
    }
}

impl ClientConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Frontend endpoint of one bridge session
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    pending: Arc<PendingCalls>,
    proxies: RwLock<HashMap<String, Arc<ProxyState>>>,
    session_id: RwLock<Option<String>>,
    closed: watch::Sender<bool>,
    runtime: Option<Handle>,
}

/// Non-owning handle to a client, for transport tasks
#[derive(Clone)]
pub struct WeakClient(Weak<ClientInner>);

impl WeakClient {
    pub fn upgrade(&self) -> Option<Client> {
        self.0.upgrade().map(|inner| Client { inner })
    }
}

impl Client {
    /// Create a client; the receiver yields every message it sends
    pub fn new(config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<ClientMessage>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);

        let runtime = Handle::try_current().ok();
        if config.call_timeout_ms.is_some() && runtime.is_none() {
            tracing::warn!("No Tokio runtime available; call timeouts are disabled");
        }

        let client = Self {
            inner: Arc::new(ClientInner {
                config,
                outbound,
                pending: PendingCalls::new(),
                proxies: RwLock::new(HashMap::new()),
                session_id: RwLock::new(None),
                closed,
                runtime,
            }),
        };
        (client, rx)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Session id announced by the server, once connected
    pub fn session_id(&self) -> Option<String> {
        self.inner.session_id.read().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Resolves once the session has ended
    pub async fn closed(&self) {
        let mut closed = self.inner.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Watch channel that flips to `true` when the session ends
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.inner.closed.subscribe()
    }

    pub fn downgrade(&self) -> WeakClient {
        WeakClient(Arc::downgrade(&self.inner))
    }

    /// Number of requests awaiting a terminal response
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Proxies
    // ─────────────────────────────────────────────────────────────────────────

    /// Proxy for a public name, created on first use without network traffic
    pub fn get_proxy(&self, public_name: &str) -> Proxy {
        Proxy::new(self.inner.proxy_state(public_name), Arc::downgrade(&self.inner))
    }

    /// Proxy for a reference handle
    pub fn proxy(&self, handle: &RefHandle) -> Proxy {
        self.get_proxy(&handle.public_name)
    }

    /// Proxy for a value, if it is a reference
    pub fn proxy_for(&self, value: &Value) -> Option<Proxy> {
        value.as_ref_handle().map(|handle| self.proxy(handle))
    }

    /// Whether a proxy exists for a public name
    pub fn has_proxy(&self, public_name: &str) -> bool {
        self.inner.proxies.read().contains_key(public_name)
    }

    pub fn proxy_count(&self) -> usize {
        self.inner.proxies.read().len()
    }

    /// Fetch the server's named root objects
    pub async fn context(&self) -> Result<HashMap<String, Proxy>, ClientError> {
        let value = self.inner.request(|id| ClientMessage::GetContext { id }).await?;
        let entries = value
            .as_object()
            .ok_or_else(|| ClientError::Protocol(format!("context is {}, not a mapping", value.type_name())))?;

        Ok(entries
            .iter()
            .filter_map(|(name, value)| Some((name.clone(), self.proxy_for(value)?)))
            .collect())
    }

    /// Stop mirroring an object: drops its proxy and tells the server
    pub fn release(&self, public_name: &str) -> bool {
        let removed = self.inner.proxies.write().remove(public_name).is_some();
        if removed {
            let _ = self.inner.outbound.send(ClientMessage::Release {
                target: RefHandle::new(public_name),
            });
            tracing::debug!(public_name = %public_name, "Released proxy");
        }
        removed
    }

    /// End the session: fails every pending call and drops every proxy
    pub fn disconnect(&self) {
        if self.inner.closed.send_replace(true) {
            return;
        }
        let failed = self.inner.pending.fail_all(ClientError::ConnectionClosed);
        self.inner.proxies.write().clear();
        tracing::info!(failed_calls = failed, "Bridge session ended");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound
    // ─────────────────────────────────────────────────────────────────────────

    /// Parse and apply one inbound text frame
    pub fn handle_text(&self, text: &str) -> Result<(), ClientError> {
        let message = serde_json::from_str::<ServerMessage>(text).map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse server message");
            ClientError::Protocol(e.to_string())
        })?;
        self.handle_message(message);
        Ok(())
    }

    /// Apply one inbound message
    pub fn handle_message(&self, message: ServerMessage) {
        match message {
            ServerMessage::Connected {
                session_id,
                server_version,
            } => {
                tracing::info!(%session_id, %server_version, "Bridge session established");
                *self.inner.session_id.write() = Some(session_id);
            }
            ServerMessage::CallResult { id, value } => {
                self.inner.discover_refs(&value);
                self.resolve(id, Ok(value));
            }
            ServerMessage::Error {
                id: Some(id),
                kind,
                message,
            } => {
                self.resolve(id, Err(ClientError::Remote(BridgeError::new(kind, message))));
            }
            ServerMessage::Error { id: None, kind, message } => {
                tracing::warn!(%kind, %message, "Server reported an error without a call id");
            }
            ServerMessage::ChangeNotification {
                target,
                attribute,
                value,
            } => {
                let state = self.inner.proxies.read().get(&target.public_name).cloned();
                match state {
                    Some(state) => {
                        self.inner.discover_refs(&value);
                        state.apply(&attribute, value);
                    }
                    None => {
                        tracing::trace!(public_name = %target.public_name, %attribute, "Dropping notification for unmirrored object");
                    }
                }
            }
        }
    }

    fn resolve(&self, id: CallId, reply: Result<Value, ClientError>) {
        if !self.inner.pending.resolve(id, reply) {
            tracing::debug!(id, "Dropping response for unknown call id");
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("session_id", &self.session_id())
            .field("proxies", &self.proxy_count())
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ClientInner {
    fn proxy_state(&self, public_name: &str) -> Arc<ProxyState> {
        if let Some(state) = self.proxies.read().get(public_name) {
            return state.clone();
        }
        self.proxies
            .write()
            .entry(public_name.to_string())
            .or_insert_with(|| ProxyState::new(public_name))
            .clone()
    }

    /// Create proxies for every reference in an inbound value
    fn discover_refs(&self, value: &Value) {
        if *self.closed.borrow() {
            return;
        }
        value.for_each_ref(&mut |handle: &RefHandle| {
            self.proxy_state(&handle.public_name);
        });
    }

    /// Send a request and register its pending entry
    pub(crate) fn request(&self, build: impl FnOnce(CallId) -> ClientMessage) -> PendingCall {
        let call = self.pending.register();
        let id = call.id();

        if *self.closed.borrow() || self.outbound.send(build(id)).is_err() {
            self.pending.resolve(id, Err(ClientError::ConnectionClosed));
            return call;
        }

        if let (Some(timeout), Some(runtime)) = (self.config.call_timeout(), &self.runtime) {
            let pending = self.pending.clone();
            runtime.spawn(async move {
                tokio::time::sleep(timeout).await;
                if pending.resolve(id, Err(ClientError::Timeout(timeout))) {
                    tracing::debug!(id, ?timeout, "Call timed out");
                }
            });
        }
        call
    }
}
