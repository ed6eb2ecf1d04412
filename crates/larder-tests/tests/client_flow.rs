//! The client connection manager against a live hub: connect, receive,
//! reconcile optimistic echoes, and fall back to backoff when the server
//! goes away.

use std::sync::Arc;
use std::time::Duration;

use larder_client::{
    ConnectionManager, ConnectionState, EchoSuppressor, EventBus, ManagerConfig, StaticCredential,
};
use larder_tests::harness::{TestClient, TestServer};
use larder_tests::init_tracing;

const DEADLINE: Duration = Duration::from_secs(5);

async fn wait_for_state(
    rx: &mut tokio::sync::watch::Receiver<ConnectionState>,
    want: ConnectionState,
) -> bool {
    let deadline = tokio::time::Instant::now() + DEADLINE;
    loop {
        if *rx.borrow() == want {
            return true;
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return false;
        }
        if tokio::time::timeout(remaining, rx.changed()).await.is_err() {
            return *rx.borrow() == want;
        }
    }
}

#[tokio::test]
async fn manager_connects_and_republishes_events() {
    init_tracing();
    let server = TestServer::spawn().await.unwrap();

    let bus = Arc::new(EventBus::new(16));
    let mut events = bus.subscribe();
    let manager = ConnectionManager::new(
        ManagerConfig::new(server.events_url()),
        Arc::new(StaticCredential::new(Some("alice-token".to_string()))),
        Arc::clone(&bus) as Arc<dyn larder_client::EventSink>,
    );
    let mut state = manager.state();
    let handle = manager.spawn();

    assert!(wait_for_state(&mut state, ConnectionState::Connected).await);
    assert!(state.borrow().is_connected());

    // Another member mutates; the event arrives on the local bus.
    let bob = TestClient::new(&server.base_url(), "bob-token");
    let list = bob.create_list("groceries").await.unwrap();

    let event = tokio::time::timeout(DEADLINE, events.recv())
        .await
        .expect("event within deadline")
        .expect("bus open");
    assert_eq!(event.list_id.as_deref(), list["id"].as_str());

    manager.teardown();
    handle.await.unwrap();
}

#[tokio::test]
async fn manager_backs_off_when_server_disappears() {
    init_tracing();
    let mut server = TestServer::spawn().await.unwrap();

    let bus = Arc::new(EventBus::new(16));
    let _listener = bus.subscribe();
    let manager = ConnectionManager::new(
        ManagerConfig::new(server.events_url()),
        Arc::new(StaticCredential::new(Some("alice-token".to_string()))),
        Arc::clone(&bus) as Arc<dyn larder_client::EventSink>,
    );
    let mut state = manager.state();
    let handle = manager.spawn();

    assert!(wait_for_state(&mut state, ConnectionState::Connected).await);

    server.shutdown();

    // Stream drop lands the manager in its backoff loop, same as any other
    // disconnect.
    assert!(wait_for_state(&mut state, ConnectionState::BackoffWait).await);

    manager.teardown();
    handle.await.unwrap();
}

#[tokio::test]
async fn self_echo_suppressed_but_remote_changes_refresh() {
    init_tracing();
    let server = TestServer::spawn().await.unwrap();

    let bus = Arc::new(EventBus::new(16));
    let mut events = bus.subscribe();
    let manager = ConnectionManager::new(
        ManagerConfig::new(server.events_url()),
        Arc::new(StaticCredential::new(Some("alice-token".to_string()))),
        Arc::clone(&bus) as Arc<dyn larder_client::EventSink>,
    );
    let mut state = manager.state();
    let handle = manager.spawn();
    assert!(wait_for_state(&mut state, ConnectionState::Connected).await);

    let alice = TestClient::new(&server.base_url(), "alice-token");
    let list = alice.create_list("groceries").await.unwrap();
    let list_id = list["id"].as_str().unwrap().to_string();
    let _created = tokio::time::timeout(DEADLINE, events.recv()).await.unwrap();

    let suppressor = EchoSuppressor::new(Duration::from_secs(2));

    // Alice checks an item optimistically: record the echo, then mutate.
    let item = alice.add_item(&list_id, "milk").await.unwrap();
    let item_id = item["id"].as_str().unwrap().to_string();
    let added = tokio::time::timeout(DEADLINE, events.recv())
        .await
        .expect("item event")
        .expect("bus open");
    assert_eq!(added.mutation_key(), Some(item_id.as_str()));

    suppressor.record(&item_id);
    alice
        .set_item_state(&list_id, &item_id, "checked")
        .await
        .unwrap();

    let echoed = tokio::time::timeout(DEADLINE, events.recv())
        .await
        .expect("echo event")
        .expect("bus open");
    let plan = suppressor.plan(&echoed);
    assert!(!plan.primary, "own change inside the grace window is an echo");
    assert!(plan.activity, "the activity feed still refreshes");

    // Bob's change to the same item, after the window, is not an echo.
    tokio::time::sleep(Duration::from_millis(2100)).await;
    let bob = TestClient::new(&server.base_url(), "bob-token");
    bob.set_item_state(&list_id, &item_id, "not_needed")
        .await
        .unwrap();
    let remote = tokio::time::timeout(DEADLINE, events.recv())
        .await
        .expect("remote event")
        .expect("bus open");
    let plan = suppressor.plan(&remote);
    assert!(plan.primary, "post-window change refreshes primary state");

    manager.teardown();
    handle.await.unwrap();
}
