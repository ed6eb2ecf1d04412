//! Heartbeats keep idle streams alive and are invisible to event parsing.

use std::time::Duration;

use larder_protocol::frame::DecodedFrame;
use larder_tests::harness::{TestClient, TestServer};
use larder_tests::init_tracing;

#[tokio::test]
async fn idle_stream_receives_heartbeats() {
    init_tracing();
    // Harness default heartbeat is 1s.
    let server = TestServer::spawn().await.unwrap();

    let alice = TestClient::new(&server.base_url(), "alice-token");
    let mut stream = alice.open_events().await.unwrap();

    let frame = stream
        .next_frame(Duration::from_secs(3))
        .await
        .expect("keepalive on an idle stream");
    assert!(matches!(frame, DecodedFrame::Comment));
}

#[tokio::test]
async fn heartbeats_do_not_surface_as_events() {
    init_tracing();
    let server = TestServer::spawn().await.unwrap();

    let alice = TestClient::new(&server.base_url(), "alice-token");
    let mut stream = alice.open_events().await.unwrap();

    // Wait past a heartbeat, then mutate; the first *event* seen must be
    // the mutation, not the keepalive.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let list = alice.create_list("groceries").await.unwrap();

    let event = stream
        .next_event(Duration::from_secs(3))
        .await
        .expect("mutation event");
    assert_eq!(event.list_id.as_deref(), list["id"].as_str());
}
