//! End-to-end tests over the in-process transport

use std::sync::Arc;
use std::time::Duration;

use loom::connect_local;
use loom::demo::Demo;
use loom_client::{Client, ClientConfig, ClientError, Proxy, ProxyEvent};
use loom_runtime::{Model, ModelError, ModelRef, ModelValue, Record, Registry};
use loom_server::Bridge;
use loom_types::{ErrorKind, Value};
use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

struct Harness {
    bridge: Arc<Bridge>,
    demo: Demo,
}

impl Harness {
    fn new() -> Self {
        let bridge = Bridge::new(Arc::new(Registry::new()));
        let demo = Demo::new();
        demo.expose(&bridge).unwrap();
        Self { bridge, demo }
    }

    fn client(&self) -> Client {
        let config = ClientConfig {
            call_timeout_ms: Some(5_000),
            ..Default::default()
        };
        connect_local(&self.bridge, config)
    }
}

async fn next_event(events: &mut broadcast::Receiver<ProxyEvent>) -> ProxyEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for a change notification")
        .expect("event stream closed")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_fred_scenario() {
    let harness = Harness::new();
    let alice = harness.client();
    let bob = harness.client();

    let fred = alice.get_proxy("fred");
    assert_eq!(fred.get("age").await.unwrap(), Value::from(40));

    // Bob mirrors fred by reading from it once
    let bob_fred = bob.get_proxy("fred");
    assert_eq!(bob_fred.get("age").await.unwrap(), Value::from(40));
    let mut events = bob_fred.subscribe();

    assert_ok!(fred.set("age", 41).await);
    assert_eq!(harness.demo.fred.get("age").unwrap(), ModelValue::from(41));

    let event = next_event(&mut events).await;
    assert_eq!(
        event,
        ProxyEvent {
            attribute: "age".to_string(),
            value: Value::from(41)
        }
    );
    assert_eq!(bob_fred.cached("age"), Some(Value::from(41)));
    assert_eq!(bob.pending_count(), 0);
}

#[tokio::test]
async fn test_async_calls_resolve_independently() {
    let harness = Harness::new();
    let client = harness.client();
    let fred = client.get_proxy("fred");

    let first = fred.call("method", vec![Value::from("hello")]);
    let second = fred.call("greet", vec![Value::from("Barney")]);
    assert_ne!(first.id(), second.id());

    let (first, second) = tokio::join!(first, second);
    assert_eq!(first.unwrap(), Value::Null);
    assert_eq!(second.unwrap(), Value::from("Hello Barney, I am Fred"));
    assert_eq!(fred.get("called_with").await.unwrap(), Value::from("hello"));
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_notifications_arrive_in_mutation_order() {
    let harness = Harness::new();
    let writer = harness.client();
    let reader = harness.client();

    let observed = reader.get_proxy("fred");
    observed.get("age").await.unwrap();
    let mut events = observed.subscribe();

    let fred = writer.get_proxy("fred");
    for age in 41..=60 {
        fred.set("age", age).await.unwrap();
    }

    let mut ages = Vec::new();
    while ages.len() < 20 {
        let event = next_event(&mut events).await;
        assert_eq!(event.attribute, "age");
        ages.push(event.value.as_i64().unwrap());
    }
    assert_eq!(ages, (41..=60).collect::<Vec<_>>());
    assert_eq!(observed.cached("age"), Some(Value::from(60)));
}

#[tokio::test]
async fn test_failure_isolation() {
    let harness = Harness::new();
    let broken: ModelRef = Record::builder("Broken")
        .attribute("status", "ok")
        .method("fail", |_, _| Err(ModelError::failed("backend exploded")))
        .method("explode", |_, _| panic!("kaboom"))
        .build();
    harness.bridge.expose_context("broken", &broken).unwrap();

    let client = harness.client();
    let proxy = client.get_proxy("broken");

    let err = assert_err!(proxy.call("fail", vec![]).await);
    assert_eq!(err.kind(), Some(ErrorKind::ApplicationError));
    assert!(err.to_string().contains("backend exploded"));

    let err = assert_err!(proxy.call("explode", vec![]).await);
    assert_eq!(err.kind(), Some(ErrorKind::ApplicationError));

    let err = assert_err!(proxy.call("missing", vec![]).await);
    assert_eq!(err.kind(), Some(ErrorKind::AttributeError));

    let err = assert_err!(client.get_proxy("fred").set("age", "forty").await);
    assert_eq!(err.kind(), Some(ErrorKind::AttributeError));
    assert_eq!(harness.demo.fred.get("age").unwrap(), ModelValue::from(40));

    let err = assert_err!(client.get_proxy("nobody").get("age").await);
    assert_eq!(err.kind(), Some(ErrorKind::NotFoundError));

    // The session is still usable
    assert_eq!(proxy.get("status").await.unwrap(), Value::from("ok"));
    assert!(!client.is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_call_from_thread() {
    let harness = Harness::new();
    let client = harness.client();
    let fred = client.get_proxy("fred");

    let worker = fred.clone();
    let age = tokio::task::spawn_blocking(move || worker.call_blocking("birthday", vec![]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(age, Value::from(41));

    let worker = fred.clone();
    let name = tokio::task::spawn_blocking(move || worker.get_blocking("name"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(name, Value::from("Fred"));
}

#[tokio::test]
async fn test_reference_identity() {
    let harness = Harness::new();
    let client = harness.client();

    let context = client.context().await.unwrap();
    let fred = context["fred"].clone();
    let wilma = context["wilma"].clone();
    assert_eq!(wilma.public_name(), "wilma");

    fred.set("spouse", wilma.handle()).await.unwrap();
    let spouse = fred.get("spouse").await.unwrap();
    let spouse: Proxy = client.proxy_for(&spouse).unwrap();
    assert!(spouse.same_as(&wilma));
    assert_eq!(spouse.get("name").await.unwrap(), Value::from("Wilma"));

    // Same backend object, same name, from another session
    let other = harness.client();
    let spouse = other.get_proxy("fred").get("spouse").await.unwrap();
    assert_eq!(spouse.as_ref_handle().unwrap().public_name, "wilma");
    assert_eq!(harness.bridge.registry().len(), 2);
}

#[tokio::test]
async fn test_fresh_objects_are_exposed_by_reference() {
    let harness = Harness::new();
    let pebbles: ModelRef = loom::demo::person("Pebbles", 2);
    harness.demo.wilma.set("spouse", ModelValue::Object(pebbles.clone())).unwrap();

    let client = harness.client();
    let value = client.get_proxy("wilma").get("spouse").await.unwrap();
    let handle = value.as_ref_handle().unwrap();
    assert_eq!(handle.public_name, "Person_1");
    assert!(client.has_proxy("Person_1"));

    let child = client.proxy(handle);
    assert_eq!(child.get("age").await.unwrap(), Value::from(2));
}

#[tokio::test]
async fn test_release_stops_mirroring() {
    let harness = Harness::new();
    let client = harness.client();
    let fred = client.get_proxy("fred");
    fred.get("age").await.unwrap();

    let session_id = Uuid::parse_str(&client.session_id().unwrap()).unwrap();
    assert!(harness.bridge.is_mirroring(session_id, "fred"));

    assert!(client.release("fred"));
    assert!(!client.has_proxy("fred"));

    // Requests are handled in order, so the release has landed once this returns
    client.get_proxy("wilma").get("age").await.unwrap();
    assert!(!harness.bridge.is_mirroring(session_id, "fred"));
    assert!(harness.bridge.is_mirroring(session_id, "wilma"));
}

#[tokio::test]
async fn test_disconnect_closes_session() {
    let harness = Harness::new();
    let client = harness.client();
    client.get_proxy("fred").get("age").await.unwrap();
    assert_eq!(harness.bridge.session_count(), 1);

    client.disconnect();
    wait_until(|| harness.bridge.session_count() == 0).await;

    let err = assert_err!(client.get_proxy("fred").get("name").await);
    assert!(matches!(err, ClientError::ConnectionClosed));
}

#[tokio::test]
async fn test_dropping_client_closes_session() {
    let harness = Harness::new();
    let client = harness.client();
    client.get_proxy("fred").get("age").await.unwrap();

    drop(client);
    wait_until(|| harness.bridge.session_count() == 0).await;
}

#[tokio::test]
async fn test_shutdown_ends_sessions() {
    let harness = Harness::new();
    let client = harness.client();
    client.get_proxy("fred").get("age").await.unwrap();

    harness.bridge.shutdown();
    tokio::time::timeout(Duration::from_secs(2), client.closed())
        .await
        .expect("client did not observe shutdown");
    assert!(harness.bridge.registry().is_empty());
}
