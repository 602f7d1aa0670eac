//! Inbound routing through a live connection.

mod common;

use std::sync::Arc;

use common::{client_with, settle};
use evstream_ws::{Message, StaticCredential};
use parking_lot::Mutex;
use serde_json::json;

type Log = Arc<Mutex<Vec<String>>>;

fn recording(log: &Log, tag: &'static str) -> impl Fn(&Message) + Send + Sync + 'static {
    let log = log.clone();
    move |msg: &Message| log.lock().push(format!("{tag}:{}", msg.event_type))
}

#[tokio::test(start_paused = true)]
async fn test_exact_and_wildcard_routing() {
    let (client, _transport, mut accepted) = client_with(StaticCredential::new("t"));
    let log: Log = Arc::default();
    client.subscribe("*", recording(&log, "all"));
    client.subscribe("vote.cast", recording(&log, "votes"));

    client.connect();
    let conn = accepted.recv().await.expect("accepted");
    settle().await;

    conn.push(r#"{"type":"vote.cast","payload":{"id":1}}"#);
    conn.push(r#"{"type":"fault.updated","payload":null}"#);
    settle().await;

    assert_eq!(
        *log.lock(),
        ["votes:vote.cast", "all:vote.cast", "all:fault.updated"]
    );
    assert_eq!(client.dispatched_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_pong_never_reaches_wildcard() {
    let (client, _transport, mut accepted) = client_with(StaticCredential::new("t"));
    let log: Log = Arc::default();
    client.subscribe("*", recording(&log, "all"));
    client.subscribe("pong", recording(&log, "pong"));

    client.connect();
    let conn = accepted.recv().await.expect("accepted");
    settle().await;

    conn.push(r#"{"type":"pong","timestamp":"2024-01-01T00:00:00.000Z"}"#);
    settle().await;

    assert!(log.lock().is_empty());
    assert!(client.last_event_timestamp().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frames_are_dropped() {
    let (client, _transport, mut accepted) = client_with(StaticCredential::new("t"));
    let log: Log = Arc::default();
    client.subscribe("*", recording(&log, "all"));

    client.connect();
    let conn = accepted.recv().await.expect("accepted");
    settle().await;

    conn.push("{not json");
    conn.push(r#"{"payload":{"id":1}}"#);
    conn.push(r#"{"type":"","payload":1}"#);
    conn.push(r#"{"type":"ok"}"#);
    settle().await;

    assert_eq!(*log.lock(), ["all:ok"]);
    assert!(client.is_connected(), "bad frames do not affect the connection");
}

#[tokio::test(start_paused = true)]
async fn test_last_event_timestamp_tracked() {
    let (client, _transport, mut accepted) = client_with(StaticCredential::new("t"));

    client.connect();
    let conn = accepted.recv().await.expect("accepted");
    settle().await;

    let mut msg = Message::new("fault.updated", json!({"id": 9}));
    msg.timestamp = Some("2024-05-01T10:00:00.000Z".to_string());
    conn.push_message(&msg);
    settle().await;

    assert_eq!(
        client.last_event_timestamp().as_deref(),
        Some("2024-05-01T10:00:00.000Z")
    );
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_stops_delivery() {
    let (client, _transport, mut accepted) = client_with(StaticCredential::new("t"));
    let log: Log = Arc::default();
    let first = client.subscribe("x", recording(&log, "a"));
    client.subscribe("x", recording(&log, "b"));

    client.connect();
    let conn = accepted.recv().await.expect("accepted");
    settle().await;

    conn.push(r#"{"type":"x"}"#);
    settle().await;
    assert!(client.unsubscribe(&first));
    assert!(!client.unsubscribe(&first));
    conn.push(r#"{"type":"x"}"#);
    settle().await;

    assert_eq!(*log.lock(), ["a:x", "b:x", "b:x"]);
}

#[tokio::test(start_paused = true)]
async fn test_subscriptions_survive_reconnect() {
    let (client, _transport, mut accepted) = client_with(StaticCredential::new("t"));
    let log: Log = Arc::default();
    client.subscribe("x", recording(&log, "h"));

    client.connect();
    let first = accepted.recv().await.expect("first");
    settle().await;
    first.close(1011, "server error");
    settle().await;

    let second = accepted.recv().await.expect("second");
    settle().await;
    second.push(r#"{"type":"x"}"#);
    settle().await;

    assert_eq!(*log.lock(), ["h:x"]);
}

#[tokio::test(start_paused = true)]
async fn test_handler_may_send_and_disconnect() {
    let (client, _transport, mut accepted) = client_with(StaticCredential::new("t"));
    let c = client.clone();
    client.subscribe("echo", move |msg| {
        assert!(c.send(&Message::new("echo.ack", msg.payload.clone())));
        c.disconnect();
    });

    client.connect();
    let mut conn = accepted.recv().await.expect("accepted");
    settle().await;

    conn.push(r#"{"type":"echo","payload":{"n":1}}"#);
    let ack = conn.next_message().await;
    assert_eq!(ack.event_type, "echo.ack");
    assert_eq!(ack.payload, json!({"n": 1}));

    settle().await;
    assert!(!client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_frames_after_disconnect_are_not_dispatched() {
    let (client, _transport, mut accepted) = client_with(StaticCredential::new("t"));
    let log: Log = Arc::default();
    client.subscribe("*", recording(&log, "all"));

    client.connect();
    let conn = accepted.recv().await.expect("accepted");
    settle().await;
    client.disconnect();

    // The reader is gone; a late frame has nowhere to go
    let _ = conn
        .peer
        .inbound
        .send(evstream_ws::TransportEvent::Text(r#"{"type":"late"}"#.to_string()));
    settle().await;
    assert!(log.lock().is_empty());
}
