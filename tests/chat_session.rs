//! End-to-end session against a local WebSocket server.
//!
//! The server mimics the chat package: it answers correlated frames with a
//! reply carrying the same `timestamp` and broadcasts `chat/new_message`
//! back as a standing event.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use meteor_client::{
    ClientConfig, ConnectionState, DisconnectReason, Envelope, Error, Meteor, PublishOptions,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// Helpers
// ============================================================================

const WAIT: Duration = Duration::from_secs(5);

/// Starts a one-connection chat server. Every frame it receives is also
/// forwarded to the returned channel.
async fn spawn_server() -> (u16, mpsc::UnboundedReceiver<Envelope>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");

        while let Some(Ok(message)) = ws.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            let envelope = Envelope::from_frame(text.as_str()).expect("client frame");
            let _ = seen_tx.send(envelope.clone());

            let reply = match (envelope.event.as_str(), envelope.timestamp) {
                ("chat/quit", _) => break,
                (_, Some(id)) => Envelope::new(envelope.event.clone(), json!({ "ok": true }))
                    .expect("valid")
                    .with_correlation(id),
                ("chat/new_message", None) => Envelope::new(
                    "chat/new_message",
                    json!({ "user": "alice", "msg": envelope.data["msg"] }),
                )
                .expect("valid"),
                _ => continue,
            };

            let frame = reply.to_frame().expect("frame");
            if ws.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }

        let _ = ws.close(None).await;
    });

    (port, seen_rx)
}

fn config(port: u16) -> ClientConfig {
    ClientConfig::builder()
        .page_url(format!("http://127.0.0.1:{port}/"))
        .ready_timeout(WAIT)
        .request_timeout(WAIT)
        .build()
        .expect("valid config")
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn sends_before_ready_are_delivered_in_order() {
    let (port, mut seen) = spawn_server().await;
    let meteor = Meteor::connect(config(port)).expect("connect");

    for n in 0..3 {
        meteor
            .publish(PublishOptions::new("chat/typing").data(json!({ "n": n })))
            .expect("publish");
    }
    meteor.wait_ready().await.expect("ready");

    for n in 0..3 {
        let envelope = timeout(WAIT, seen.recv()).await.expect("in time").expect("frame");
        assert_eq!(envelope.event, "chat/typing");
        assert_eq!(envelope.data, json!({ "n": n }));
    }
}

#[tokio::test]
async fn ready_callbacks_run_in_order_after_open() {
    let (port, _seen) = spawn_server().await;
    let meteor = Meteor::connect(config(port)).expect("connect");
    let (tx, mut rx) = mpsc::unbounded_channel();

    for label in ["first", "second", "third"] {
        let tx = tx.clone();
        let handle = meteor.clone();
        meteor.on_ready(move || {
            assert_eq!(handle.state(), ConnectionState::Ready);
            let _ = tx.send(label);
        });
    }

    meteor.wait_ready().await.expect("ready");

    let mut order = Vec::new();
    for _ in 0..3 {
        order.push(timeout(WAIT, rx.recv()).await.expect("in time").expect("label"));
    }
    assert_eq!(order, ["first", "second", "third"]);
}

#[tokio::test]
async fn broadcast_reaches_standing_subscription() {
    let (port, _seen) = spawn_server().await;
    let meteor = Meteor::connect(config(port)).expect("connect");
    let mut messages = meteor.reactor().event_channel("chat/new_message");

    meteor.wait_ready().await.expect("ready");
    meteor
        .publish(PublishOptions::new("chat/new_message").data(json!({ "msg": "hi" })))
        .expect("publish");

    let payload = timeout(WAIT, messages.recv()).await.expect("in time").expect("payload");
    assert_eq!(payload, json!({ "user": "alice", "msg": "hi" }));
}

#[tokio::test]
async fn request_matches_correlated_reply() {
    let (port, mut seen) = spawn_server().await;
    let meteor = Meteor::connect(config(port)).expect("connect");
    meteor.wait_ready().await.expect("ready");

    let reply = meteor.request("chat/ping", json!({})).await.expect("reply");
    assert_eq!(reply, json!({ "ok": true }));
    assert_eq!(meteor.reactor().pending_count(), 0);

    let sent = timeout(WAIT, seen.recv()).await.expect("in time").expect("frame");
    assert_eq!(sent.event, "chat/ping");
    assert!(sent.timestamp.is_some());
}

#[tokio::test]
async fn server_close_surfaces_as_connection_lost() {
    let (port, _seen) = spawn_server().await;
    let meteor = Meteor::connect(config(port)).expect("connect");
    meteor.wait_ready().await.expect("ready");

    meteor
        .publish(PublishOptions::new("chat/quit"))
        .expect("publish");

    let reason = timeout(WAIT, meteor.wait_closed()).await.expect("in time");
    assert_eq!(reason, DisconnectReason::ClosedByRemote);

    let err = meteor
        .publish(PublishOptions::new("chat/new_message"))
        .unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
}

#[tokio::test]
async fn unreachable_server_fails_ready() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);

    let meteor = Meteor::connect(config(port)).expect("connect");
    let err = meteor.wait_ready().await.unwrap_err();

    assert!(matches!(err, Error::Connection { .. }));
    assert_eq!(meteor.state(), ConnectionState::Closed);
}
