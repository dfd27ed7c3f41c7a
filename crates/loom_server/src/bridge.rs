//! Bridge Dispatcher
//!
//! Executes inbound requests against exposed backend objects and fans change
//! notifications out to the sessions mirroring them. Independent of the
//! transport: a session is just an id and an outbound channel.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use loom_runtime::{
    ChangeCallback, Marshaller, Model, ModelRef, ModelValue, Registry, RegistryError,
    SubscriptionId, WidgetMounts,
};
use loom_types::{BridgeError, ClientMessage, RefHandle, ServerMessage, Value, best_effort_id};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifier of one client session
pub type SessionId = Uuid;

/// Per-session state
struct Session {
    /// Outbound messages, delivered in send order
    tx: mpsc::UnboundedSender<ServerMessage>,

    /// Public names of objects this session mirrors
    mirrored: HashSet<String>,
}

/// Change subscriptions held on one exposed object
struct Watch {
    object: Weak<dyn Model>,
    subscriptions: Vec<SubscriptionId>,
}

impl Watch {
    fn cancel(self) {
        if let Some(object) = self.object.upgrade() {
            for id in self.subscriptions {
                object.unsubscribe(id);
            }
        }
    }
}

/// A change reported by a backend object, queued for fan-out
struct Change {
    public_name: String,
    attribute: String,
    value: ModelValue,
}

// ─────────────────────────────────────────────────────────────────────────────
// Bridge
// ─────────────────────────────────────────────────────────────────────────────

/// Backend endpoint shared by all sessions
pub struct Bridge {
    registry: Arc<Registry>,
    marshaller: Marshaller,

    /// Context name -> public name
    context: RwLock<BTreeMap<String, String>>,

    sessions: DashMap<SessionId, Session>,

    /// Public name -> subscriptions on that object
    watches: DashMap<String, Watch>,

    changes_tx: mpsc::UnboundedSender<Change>,

    widgets: WidgetMounts,
}

impl Bridge {
    /// Create a bridge over `registry`
    ///
    /// Spawns the notification pump, so this must be called within a Tokio runtime.
    pub fn new(registry: Arc<Registry>) -> Arc<Self> {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let bridge = Arc::new(Self {
            marshaller: Marshaller::new(registry.clone()),
            registry,
            context: RwLock::new(BTreeMap::new()),
            sessions: DashMap::new(),
            watches: DashMap::new(),
            changes_tx,
            widgets: WidgetMounts::new(),
        });

        tokio::spawn(notification_pump(Arc::downgrade(&bridge), changes_rx));
        bridge
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn widgets(&self) -> &WidgetMounts {
        &self.widgets
    }

    /// Expose a root object under a context name
    ///
    /// The public name is the context name unless the object is already
    /// exposed under another one.
    pub fn expose_context(&self, name: &str, object: &ModelRef) -> Result<RefHandle, RegistryError> {
        let public_name = match self.registry.expose_as(name, object) {
            Ok(public_name) => public_name,
            Err(RegistryError::AlreadyExposed(existing)) => existing,
            Err(err) => return Err(err),
        };
        self.ensure_watched(&public_name, object);
        self.context
            .write()
            .insert(name.to_string(), public_name.clone());

        tracing::info!(context = %name, public_name = %public_name, "Exposed context object");
        Ok(RefHandle::new(public_name))
    }

    /// Expose an object under a generated name
    pub fn expose(&self, object: &ModelRef) -> RefHandle {
        let handle = self.marshaller.handle_for(object);
        self.ensure_watched(&handle.public_name, object);
        handle
    }

    /// Stop exposing an object: drops its subscriptions, its registry entry,
    /// its widget mounts, and forgets it in every session
    pub fn unexpose(&self, object: &ModelRef) -> Option<String> {
        let public_name = self.registry.unexpose(object)?;
        self.forget(&public_name);
        Some(public_name)
    }

    /// Forget objects that no longer exist
    pub fn prune(&self) -> usize {
        let dead = self.registry.prune();
        for name in &dead {
            self.forget(name);
        }
        dead.len()
    }

    /// Tear down every session, subscription and mapping
    pub fn shutdown(&self) {
        self.unwatch_all();
        self.sessions.clear();
        self.context.write().clear();
        self.widgets.clear();
        self.registry.clear();
        tracing::info!("Bridge shut down");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a session; the receiver yields `connected` first
    pub fn open_session(&self) -> (SessionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ServerMessage::connected(session_id.to_string()));

        self.sessions.insert(
            session_id,
            Session {
                tx,
                mirrored: HashSet::new(),
            },
        );
        tracing::info!(%session_id, "Session opened");
        (session_id, rx)
    }

    /// Close a session and drop its mirror set
    pub fn close_session(&self, session_id: SessionId) {
        if self.sessions.remove(&session_id).is_some() {
            tracing::info!(%session_id, "Session closed");
        }
        self.prune();
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether a session mirrors the object with this public name
    pub fn is_mirroring(&self, session_id: SessionId, public_name: &str) -> bool {
        self.sessions
            .get(&session_id)
            .is_some_and(|session| session.mirrored.contains(public_name))
    }

    fn send(&self, session_id: SessionId, message: ServerMessage) {
        if let Some(session) = self.sessions.get(&session_id) {
            if session.tx.send(message).is_err() {
                tracing::debug!(%session_id, "Session outbound channel closed");
            }
        }
    }

    fn mirror(&self, session_id: SessionId, public_name: &str) {
        if let Some(mut session) = self.sessions.get_mut(&session_id) {
            if !session.mirrored.contains(public_name) {
                session.mirrored.insert(public_name.to_string());
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Requests
    // ─────────────────────────────────────────────────────────────────────────

    /// Parse and execute one inbound text frame, replying on the session channel
    pub async fn handle_text(&self, session_id: SessionId, text: &str) {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(%session_id, error = %err, "Failed to parse client message");
                let error = BridgeError::protocol(format!("malformed message: {err}"));
                self.send(session_id, ServerMessage::error(best_effort_id(text), error));
                return;
            }
        };

        if let Some(reply) = self.handle_message(session_id, message).await {
            self.send(session_id, reply);
        }
    }

    /// Execute one request and return its terminal response
    ///
    /// `release` has no response.
    pub async fn handle_message(
        &self,
        session_id: SessionId,
        message: ClientMessage,
    ) -> Option<ServerMessage> {
        let (id, outcome) = match message {
            ClientMessage::GetAttribute {
                id,
                target,
                attribute,
            } => (id, self.get_attribute(session_id, &target, attribute).await),
            ClientMessage::SetAttribute {
                id,
                target,
                attribute,
                value,
            } => (id, self.set_attribute(session_id, &target, attribute, &value).await),
            ClientMessage::CallMethod {
                id,
                target,
                method,
                args,
            } => (id, self.call_method(session_id, &target, method, &args).await),
            ClientMessage::GetContext { id } => (id, Ok(self.context_value())),
            ClientMessage::Release { target } => {
                self.release(session_id, &target);
                return None;
            }
        };

        match &outcome {
            Ok(value) => self.track_refs(session_id, value),
            Err(err) => {
                tracing::debug!(%session_id, id, kind = %err.kind, message = %err.message, "Request failed");
            }
        }
        Some(ServerMessage::outcome(id, outcome))
    }

    fn resolve_target(&self, session_id: SessionId, target: &RefHandle) -> Result<ModelRef, BridgeError> {
        let object = self.registry.resolve(&target.public_name)?;
        self.ensure_watched(&target.public_name, &object);
        self.mirror(session_id, &target.public_name);
        Ok(object)
    }

    async fn get_attribute(
        &self,
        session_id: SessionId,
        target: &RefHandle,
        attribute: String,
    ) -> Result<Value, BridgeError> {
        let object = self.resolve_target(session_id, target)?;
        let marshaller = self.marshaller.clone();
        run_backend(move || {
            let value = object.get(&attribute)?;
            Ok(marshaller.to_wire(&value)?)
        })
        .await
    }

    async fn set_attribute(
        &self,
        session_id: SessionId,
        target: &RefHandle,
        attribute: String,
        value: &Value,
    ) -> Result<Value, BridgeError> {
        let object = self.resolve_target(session_id, target)?;
        let value = self.marshaller.from_wire(value)?;
        run_backend(move || {
            object.set(&attribute, value)?;
            Ok(Value::Null)
        })
        .await
    }

    async fn call_method(
        &self,
        session_id: SessionId,
        target: &RefHandle,
        method: String,
        args: &[Value],
    ) -> Result<Value, BridgeError> {
        let object = self.resolve_target(session_id, target)?;
        let args = args
            .iter()
            .map(|arg| self.marshaller.from_wire(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let marshaller = self.marshaller.clone();
        run_backend(move || {
            let result = object.invoke(&method, args)?;
            Ok(marshaller.to_wire(&result)?)
        })
        .await
    }

    fn context_value(&self) -> Value {
        let context = self.context.read();
        Value::Object(
            context
                .iter()
                .filter(|(_, public_name)| self.registry.resolve(public_name).is_ok())
                .map(|(name, public_name)| {
                    (name.clone(), Value::Ref(RefHandle::new(public_name.clone())))
                })
                .collect(),
        )
    }

    fn release(&self, session_id: SessionId, target: &RefHandle) {
        if let Some(mut session) = self.sessions.get_mut(&session_id) {
            if session.mirrored.remove(&target.public_name) {
                tracing::debug!(%session_id, public_name = %target.public_name, "Released object");
            }
        }
    }

    /// Mirror and watch every object referenced by a value sent to a session
    fn track_refs(&self, session_id: SessionId, value: &Value) {
        for name in self.watch_refs(value) {
            self.mirror(session_id, &name);
        }
    }

    /// Watch every object referenced by `value`, returning their names
    fn watch_refs(&self, value: &Value) -> Vec<String> {
        let mut names = Vec::new();
        value.for_each_ref(&mut |handle: &RefHandle| names.push(handle.public_name.clone()));
        for name in &names {
            if let Ok(object) = self.registry.resolve(name) {
                self.ensure_watched(name, &object);
            }
        }
        names
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Change propagation
    // ─────────────────────────────────────────────────────────────────────────

    /// Subscribe to every declared attribute of an object, once
    fn ensure_watched(&self, public_name: &str, object: &ModelRef) {
        let Entry::Vacant(slot) = self.watches.entry(public_name.to_string()) else {
            return;
        };

        let tx = self.changes_tx.clone();
        let name = public_name.to_string();
        let callback: ChangeCallback = Arc::new(move |attribute: &str, value: &ModelValue| {
            let _ = tx.send(Change {
                public_name: name.clone(),
                attribute: attribute.to_string(),
                value: value.clone(),
            });
        });

        let subscriptions: Vec<SubscriptionId> = object
            .attributes()
            .iter()
            .filter_map(|attr| object.subscribe(&attr.name, callback.clone()))
            .collect();
        if subscriptions.is_empty() {
            tracing::debug!(public_name = %public_name, "Object does not report changes");
        } else {
            tracing::debug!(public_name = %public_name, attributes = subscriptions.len(), "Watching object");
        }

        slot.insert(Watch {
            object: Arc::downgrade(object),
            subscriptions,
        });
    }

    /// Deliver one change to every session mirroring the object
    fn fan_out(&self, change: Change) {
        let mirrored = self
            .sessions
            .iter()
            .any(|session| session.mirrored.contains(&change.public_name));
        if !mirrored {
            tracing::trace!(public_name = %change.public_name, attribute = %change.attribute, "No session mirrors changed object");
            return;
        }

        let value = match self.marshaller.to_wire(&change.value) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(
                    public_name = %change.public_name,
                    attribute = %change.attribute,
                    error = %err,
                    "Dropping change with no wire form"
                );
                return;
            }
        };
        let refs = self.watch_refs(&value);
        let target = RefHandle::new(change.public_name.clone());

        for mut session in self.sessions.iter_mut() {
            if !session.mirrored.contains(&change.public_name) {
                continue;
            }
            session.mirrored.extend(refs.iter().cloned());
            let message = ServerMessage::change(target.clone(), change.attribute.clone(), value.clone());
            if session.tx.send(message).is_err() {
                tracing::debug!(session_id = %session.key(), "Session outbound channel closed");
            }
        }
    }

    fn forget(&self, public_name: &str) {
        if let Some((_, watch)) = self.watches.remove(public_name) {
            watch.cancel();
        }
        for mut session in self.sessions.iter_mut() {
            session.mirrored.remove(public_name);
        }
        self.widgets.unregister_object(public_name);
        self.context
            .write()
            .retain(|_, exposed| exposed.as_str() != public_name);
        tracing::debug!(public_name = %public_name, "Forgot object");
    }

    fn unwatch_all(&self) {
        let names: Vec<String> = self.watches.iter().map(|watch| watch.key().clone()).collect();
        for name in names {
            if let Some((_, watch)) = self.watches.remove(&name) {
                watch.cancel();
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        // Subscriptions hold senders into the pump; dropping them lets it exit.
        self.unwatch_all();
    }
}

/// Single consumer of backend change callbacks
///
/// Changes are fanned out in the order the backend reported them.
async fn notification_pump(bridge: Weak<Bridge>, mut changes: mpsc::UnboundedReceiver<Change>) {
    while let Some(change) = changes.recv().await {
        let Some(bridge) = bridge.upgrade() else {
            break;
        };
        bridge.fan_out(change);
    }
    tracing::debug!("Notification pump stopped");
}

/// Run a backend call on the blocking pool, turning panics into errors
async fn run_backend<F>(call: F) -> Result<Value, BridgeError>
where
    F: FnOnce() -> Result<Value, BridgeError> + Send + 'static,
{
    match tokio::task::spawn_blocking(call).await {
        Ok(outcome) => outcome,
        Err(err) if err.is_panic() => {
            let payload = err.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "backend call panicked".to_string());
            tracing::error!(%message, "Backend call panicked");
            Err(BridgeError::application(message))
        }
        Err(err) => Err(BridgeError::application(format!("backend call cancelled: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use loom_runtime::{ModelError, Record};
    use loom_types::ErrorKind;

    use super::*;

    struct Fixture {
        bridge: Arc<Bridge>,
        fred: ModelRef,
        wilma: ModelRef,
    }

    fn person(name: &str, age: i64) -> Arc<Record> {
        Record::builder("Person")
            .attribute("name", name)
            .attribute("age", age)
            .attribute("spouse", ())
            .untyped("called_with", ())
            .read_only("id", 1)
            .method("method", |this, args| {
                this.set("called_with", args.into_iter().next().unwrap_or_default())?;
                Ok(ModelValue::from("done"))
            })
            .method("fail", |_, _| Err(ModelError::failed("backend exploded")))
            .method("explode", |_, _| panic!("kaboom"))
            .method("handle", |_, _| Ok(ModelValue::Opaque("file handle".into())))
            .build()
    }

    fn fixture() -> Fixture {
        let bridge = Bridge::new(Arc::new(Registry::new()));
        let fred: ModelRef = person("Fred", 40);
        let wilma: ModelRef = person("Wilma", 38);
        bridge.expose_context("fred", &fred).unwrap();
        bridge.expose_context("wilma", &wilma).unwrap();
        Fixture { bridge, fred, wilma }
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for server message")
            .expect("session channel closed")
    }

    async fn open(bridge: &Bridge) -> (SessionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let (session_id, mut rx) = bridge.open_session();
        assert!(matches!(recv(&mut rx).await, ServerMessage::Connected { .. }));
        (session_id, rx)
    }

    fn get(id: u64, target: &str, attribute: &str) -> ClientMessage {
        ClientMessage::GetAttribute {
            id,
            target: RefHandle::new(target),
            attribute: attribute.to_string(),
        }
    }

    fn set(id: u64, target: &str, attribute: &str, value: Value) -> ClientMessage {
        ClientMessage::SetAttribute {
            id,
            target: RefHandle::new(target),
            attribute: attribute.to_string(),
            value,
        }
    }

    fn call(id: u64, target: &str, method: &str, args: Vec<Value>) -> ClientMessage {
        ClientMessage::CallMethod {
            id,
            target: RefHandle::new(target),
            method: method.to_string(),
            args,
        }
    }

    fn error_kind(message: Option<ServerMessage>) -> ErrorKind {
        match message {
            Some(ServerMessage::Error { kind, .. }) => kind,
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_attribute() {
        let f = fixture();
        let (session, _rx) = open(&f.bridge).await;

        let reply = f.bridge.handle_message(session, get(1, "fred", "age")).await;
        assert_eq!(reply, Some(ServerMessage::result(1, Value::from(40))));
        assert!(f.bridge.is_mirroring(session, "fred"));
    }

    #[tokio::test]
    async fn test_malformed_messages() {
        let f = fixture();
        let (session, mut rx) = open(&f.bridge).await;

        f.bridge.handle_text(session, r#"{"type":"bogus","id":5}"#).await;
        assert!(matches!(
            recv(&mut rx).await,
            ServerMessage::Error { id: Some(5), kind: ErrorKind::ProtocolError, .. }
        ));

        f.bridge.handle_text(session, "not json").await;
        assert!(matches!(
            recv(&mut rx).await,
            ServerMessage::Error { id: None, kind: ErrorKind::ProtocolError, .. }
        ));
    }

    #[tokio::test]
    async fn test_error_kinds() {
        let f = fixture();
        let (session, _rx) = open(&f.bridge).await;
        let b = &f.bridge;

        assert_eq!(error_kind(b.handle_message(session, get(1, "barney", "age")).await), ErrorKind::NotFoundError);
        assert_eq!(error_kind(b.handle_message(session, get(2, "fred", "height")).await), ErrorKind::AttributeError);
        assert_eq!(
            error_kind(b.handle_message(session, set(3, "fred", "age", Value::from("old"))).await),
            ErrorKind::AttributeError
        );
        assert_eq!(
            error_kind(b.handle_message(session, set(4, "fred", "id", Value::from(2))).await),
            ErrorKind::ReadOnlyError
        );
        assert_eq!(
            error_kind(b.handle_message(session, call(5, "fred", "dance", vec![])).await),
            ErrorKind::AttributeError
        );
        assert_eq!(
            error_kind(b.handle_message(session, call(6, "fred", "handle", vec![])).await),
            ErrorKind::UnmarshalableError
        );
        assert_eq!(
            error_kind(
                b.handle_message(session, call(7, "fred", "method", vec![Value::Ref(RefHandle::new("ghost"))]))
                    .await
            ),
            ErrorKind::NotFoundError
        );
    }

    #[tokio::test]
    async fn test_backend_failures_keep_session_usable() {
        let f = fixture();
        let (session, _rx) = open(&f.bridge).await;

        let reply = f.bridge.handle_message(session, call(1, "fred", "fail", vec![])).await;
        match reply {
            Some(ServerMessage::Error { id, kind, message }) => {
                assert_eq!(id, Some(1));
                assert_eq!(kind, ErrorKind::ApplicationError);
                assert_eq!(message, "backend exploded");
            }
            other => panic!("unexpected reply: {other:?}"),
        }

        let reply = f.bridge.handle_message(session, call(2, "fred", "explode", vec![])).await;
        assert_eq!(error_kind(reply), ErrorKind::ApplicationError);

        let reply = f.bridge.handle_message(session, get(3, "fred", "name")).await;
        assert_eq!(reply, Some(ServerMessage::result(3, Value::from("Fred"))));
    }

    #[tokio::test]
    async fn test_call_method_with_reference_argument() {
        let f = fixture();
        let (session, _rx) = open(&f.bridge).await;

        let reply = f
            .bridge
            .handle_message(session, call(1, "fred", "method", vec![Value::Ref(RefHandle::new("wilma"))]))
            .await;
        assert_eq!(reply, Some(ServerMessage::result(1, Value::from("done"))));
        assert_eq!(f.fred.get("called_with").unwrap(), ModelValue::Object(f.wilma.clone()));
    }

    #[tokio::test]
    async fn test_change_broadcast_to_mirroring_sessions() {
        let f = fixture();
        let (a, mut a_rx) = open(&f.bridge).await;
        let (b, mut b_rx) = open(&f.bridge).await;
        let (_c, mut c_rx) = open(&f.bridge).await;

        f.bridge.handle_message(b, get(1, "fred", "age")).await;

        let reply = f.bridge.handle_message(a, set(2, "fred", "age", Value::from(41))).await;
        assert_eq!(reply, Some(ServerMessage::result(2, Value::Null)));

        let expected = ServerMessage::change(RefHandle::new("fred"), "age", Value::from(41));
        assert_eq!(recv(&mut b_rx).await, expected);
        assert_eq!(recv(&mut a_rx).await, expected);
        assert!(c_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notification_order() {
        let f = fixture();
        let (a, _a_rx) = open(&f.bridge).await;
        let (b, mut b_rx) = open(&f.bridge).await;
        f.bridge.handle_message(b, get(1, "fred", "age")).await;

        for (i, age) in (41..=60).enumerate() {
            f.bridge
                .handle_message(a, set(i as u64 + 2, "fred", "age", Value::from(age)))
                .await;
        }

        for age in 41..=60 {
            match recv(&mut b_rx).await {
                ServerMessage::ChangeNotification { attribute, value, .. } => {
                    assert_eq!(attribute, "age");
                    assert_eq!(value, Value::from(age));
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_referenced_objects_become_mirrored() {
        let f = fixture();
        let (a, mut a_rx) = open(&f.bridge).await;

        f.bridge
            .handle_message(a, set(1, "fred", "spouse", Value::Ref(RefHandle::new("wilma"))))
            .await;
        // The notification for the spouse change carries a reference to wilma.
        assert_eq!(
            recv(&mut a_rx).await,
            ServerMessage::change(RefHandle::new("fred"), "spouse", Value::Ref(RefHandle::new("wilma")))
        );
        assert!(f.bridge.is_mirroring(a, "wilma"));

        let reply = f.bridge.handle_message(a, get(2, "fred", "spouse")).await;
        assert_eq!(reply, Some(ServerMessage::result(2, Value::Ref(RefHandle::new("wilma")))));
        assert!(f.bridge.is_mirroring(a, "wilma"));

        f.wilma.set("age", ModelValue::from(39)).unwrap();
        assert_eq!(
            recv(&mut a_rx).await,
            ServerMessage::change(RefHandle::new("wilma"), "age", Value::from(39))
        );
    }

    #[tokio::test]
    async fn test_unexposed_objects_get_fresh_names() {
        let f = fixture();
        let (a, _a_rx) = open(&f.bridge).await;
        let barney: ModelRef = person("Barney", 41);
        f.fred.set("spouse", ModelValue::Object(barney.clone())).unwrap();

        let reply = f.bridge.handle_message(a, get(1, "fred", "spouse")).await;
        assert_eq!(reply, Some(ServerMessage::result(1, Value::Ref(RefHandle::new("Person_1")))));
    }

    #[tokio::test]
    async fn test_release_stops_notifications() {
        let f = fixture();
        let (a, mut a_rx) = open(&f.bridge).await;
        let (b, mut b_rx) = open(&f.bridge).await;
        f.bridge.handle_message(b, get(1, "fred", "age")).await;

        let reply = f
            .bridge
            .handle_message(b, ClientMessage::Release { target: RefHandle::new("fred") })
            .await;
        assert_eq!(reply, None);

        f.bridge.handle_message(a, set(2, "fred", "age", Value::from(50))).await;
        recv(&mut a_rx).await;
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_get_context() {
        let f = fixture();
        let (a, _a_rx) = open(&f.bridge).await;

        let reply = f.bridge.handle_message(a, ClientMessage::GetContext { id: 9 }).await;
        let Some(ServerMessage::CallResult { id, value }) = reply else {
            panic!("unexpected reply: {reply:?}");
        };
        assert_eq!(id, 9);
        assert_eq!(value.get("fred"), Some(&Value::Ref(RefHandle::new("fred"))));
        assert_eq!(value.get("wilma"), Some(&Value::Ref(RefHandle::new("wilma"))));
        assert!(f.bridge.is_mirroring(a, "wilma"));
    }

    #[tokio::test]
    async fn test_unexpose() {
        let f = fixture();
        let (a, _a_rx) = open(&f.bridge).await;
        f.bridge.widgets().register("fred", "age", |_: &loom_runtime::WidgetArgs| -> loom_runtime::Widget {
            Box::new(())
        });
        f.bridge.handle_message(a, get(1, "fred", "age")).await;

        assert_eq!(f.bridge.unexpose(&f.fred), Some("fred".to_string()));
        assert!(!f.bridge.is_mirroring(a, "fred"));
        assert!(f.bridge.widgets().is_empty());
        assert_eq!(f.fred.observers().map(|o| o.len()), Some(0));

        let reply = f.bridge.handle_message(a, get(2, "fred", "age")).await;
        assert_eq!(error_kind(reply), ErrorKind::NotFoundError);
        assert_eq!(f.bridge.unexpose(&f.fred), None);
    }

    #[tokio::test]
    async fn test_close_session_and_shutdown() {
        let f = fixture();
        let (a, _a_rx) = open(&f.bridge).await;
        let (_b, mut b_rx) = open(&f.bridge).await;
        assert_eq!(f.bridge.session_count(), 2);

        f.bridge.close_session(a);
        assert_eq!(f.bridge.session_count(), 1);

        f.bridge.shutdown();
        assert_eq!(f.bridge.session_count(), 0);
        assert!(f.bridge.registry().is_empty());
        assert_eq!(f.wilma.observers().map(|o| o.len()), Some(0));
        assert!(b_rx.recv().await.is_none());
    }
}
