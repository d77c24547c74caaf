//! Shared helpers for connection manager integration tests
#![allow(dead_code)]

use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use ara_realtime_client::transport::MemoryPeer;
use ara_realtime_client::{ConnectionEvent, InboundMessage, ManagerConfig, MessageHandler};

/// Generous upper bound; paused time auto-advances through it
const WAIT: Duration = Duration::from_secs(600);

/// Deterministic config: no jitter, no heartbeats
pub fn test_config() -> ManagerConfig {
    let mut config = ManagerConfig::default();
    config.client.url = "memory://broker".to_string();
    config.reconnect.jitter = false;
    config.heartbeat.enabled = false;
    config
}

pub async fn next_event(events: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for a connection event")
        .expect("event channel closed")
}

/// Next client frame as JSON
pub async fn next_frame(peer: &mut MemoryPeer) -> Value {
    let text = timeout(WAIT, peer.recv())
        .await
        .expect("timed out waiting for a client frame")
        .expect("client closed the link");
    serde_json::from_str(&text).expect("client frame is not JSON")
}

pub async fn expect_frame(peer: &mut MemoryPeer, kind: &str) -> Value {
    let frame = next_frame(peer).await;
    assert_eq!(frame["type"], kind, "unexpected frame {}", frame);
    frame
}

/// Frames already written by the client, without waiting
pub fn drain_frames(peer: &mut MemoryPeer) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Some(text) = peer.try_recv() {
        frames.push(serde_json::from_str(&text).expect("client frame is not JSON"));
    }
    frames
}

/// Channels of the subscribe frames in `frames`, in order
pub fn subscribed_channels(frames: &[Value]) -> Vec<String> {
    frames
        .iter()
        .filter(|f| f["type"] == "subscribe")
        .map(|f| f["payload"]["channel"].as_str().unwrap_or_default().to_string())
        .collect()
}

/// Read the CONNECT frame and confirm the handshake.
pub async fn handshake(peer: &mut MemoryPeer) -> Value {
    let connect = expect_frame(peer, "connect").await;
    assert!(
        peer.send(json!({"type": "connected", "session_id": "session-1"}).to_string())
            .await
    );
    connect
}

pub async fn deliver(peer: &MemoryPeer, destination: &str, payload: Value) {
    assert!(
        peer.send(
            json!({"type": "message", "destination": destination, "payload": payload})
                .to_string()
        )
        .await
    );
}

/// Handler forwarding every payload to a channel
pub fn forwarding_handler() -> (impl MessageHandler, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |message: &InboundMessage| -> anyhow::Result<()> {
        let _ = tx.send(message.payload.clone());
        Ok(())
    };
    (handler, rx)
}

pub fn noop_handler() -> impl MessageHandler {
    |_: &InboundMessage| -> anyhow::Result<()> { Ok(()) }
}

pub async fn recv_payload(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a delivered message")
        .expect("handler dropped")
}
