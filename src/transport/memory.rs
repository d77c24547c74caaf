//! In-process transport.
//!
//! [`MemoryTransport::pair`] returns the client-side transport and a
//! [`MemoryServer`] that accepts one [`MemoryPeer`] per opened link. The
//! server can refuse opens, push frames, close links, or simply stop
//! answering to simulate a half-open connection.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{
    CloseReason, Credentials, Transport, TransportCommand, TransportEvent, TransportLink,
    LINK_EVENT_BUFFER,
};
use crate::error::ClientError;
use crate::protocol::WireProtocol;

struct MemoryState {
    refuse_remaining: u32,
    open_attempts: u32,
    accepted: mpsc::UnboundedSender<MemoryPeer>,
}

/// Client side of the in-process transport
#[derive(Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

/// Server side of the in-process transport
pub struct MemoryServer {
    state: Arc<Mutex<MemoryState>>,
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// One accepted link, seen from the server
pub struct MemoryPeer {
    pub url: String,
    pub credentials: Credentials,
    commands: mpsc::UnboundedReceiver<TransportCommand>,
    events: mpsc::Sender<TransportEvent>,
    closed_by_client: bool,
}

impl MemoryTransport {
    pub fn pair() -> (MemoryTransport, MemoryServer) {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(MemoryState {
            refuse_remaining: 0,
            open_attempts: 0,
            accepted: accepted_tx,
        }));
        (
            MemoryTransport {
                state: state.clone(),
            },
            MemoryServer {
                state,
                accepted: accepted_rx,
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(
        &self,
        url: &str,
        credentials: &Credentials,
    ) -> Result<TransportLink, ClientError> {
        if url.trim().is_empty() {
            return Err(ClientError::InvalidUrl("empty URL".to_string()));
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| ClientError::ConnectionRefused("memory server poisoned".to_string()))?;
        state.open_attempts += 1;

        if state.refuse_remaining > 0 {
            state.refuse_remaining -= 1;
            return Err(ClientError::ConnectionRefused(format!(
                "memory server refused connection to {}",
                url
            )));
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(LINK_EVENT_BUFFER);

        let peer = MemoryPeer {
            url: url.to_string(),
            credentials: credentials.clone(),
            commands: cmd_rx,
            events: event_tx,
            closed_by_client: false,
        };
        state.accepted.send(peer).map_err(|_| {
            ClientError::ConnectionRefused("memory server is not listening".to_string())
        })?;

        Ok(TransportLink::new(cmd_tx, event_rx))
    }
}

impl MemoryServer {
    /// Refuse the next `count` open attempts.
    pub fn refuse_next(&self, count: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.refuse_remaining = count;
        }
    }

    /// Total open attempts seen, refused ones included.
    pub fn open_attempts(&self) -> u32 {
        self.state.lock().map(|s| s.open_attempts).unwrap_or(0)
    }

    /// Wait for the next accepted link.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.recv().await
    }

    /// Answer every link with a minimal broker: handshakes are confirmed,
    /// probes answered and sent payloads echoed back on their channel.
    pub fn spawn_loopback(mut self, protocol: WireProtocol) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(peer) = self.accept().await {
                tokio::spawn(loopback_peer(peer, protocol));
            }
        })
    }
}

async fn loopback_peer(mut peer: MemoryPeer, protocol: WireProtocol) {
    tracing::debug!(url = %peer.url, identity = %peer.credentials.identity, "Loopback peer accepted");
    while let Some(frame) = peer.recv().await {
        let reply = match protocol {
            WireProtocol::Json => loopback_json(&frame),
            WireProtocol::Stomp => loopback_stomp(&frame),
        };
        if let Some(reply) = reply {
            if !peer.send(reply).await {
                break;
            }
        }
    }
}

fn loopback_json(frame: &str) -> Option<String> {
    let value: Value = serde_json::from_str(frame).ok()?;
    let payload = value.get("payload").cloned().unwrap_or(Value::Null);
    let reply = match value.get("type")?.as_str()? {
        "connect" => json!({"type": "connected", "session_id": uuid::Uuid::new_v4().to_string()}),
        "ping" => json!({"type": "pong", "nonce": payload.get("nonce")}),
        "subscribe" => json!({"type": "subscribed", "payload": [payload.get("channel")]}),
        "unsubscribe" => json!({"type": "unsubscribed", "payload": [payload.get("channel")]}),
        "send" => json!({
            "type": "message",
            "destination": payload.get("channel"),
            "payload": payload.get("body"),
        }),
        _ => return None,
    };
    Some(reply.to_string())
}

fn loopback_stomp(frame: &str) -> Option<String> {
    if frame.trim_matches(['\r', '\n']).is_empty() {
        return Some("\n".to_string());
    }
    let (head, body) = frame.split_once("\n\n")?;
    let mut lines = head.lines();
    let command = lines.next()?;
    let destination = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| *k == "destination")
        .map(|(_, v)| v.to_string());
    match command {
        "CONNECT" => Some(format!(
            "CONNECTED\nversion:1.2\nsession:{}\n\n\0",
            uuid::Uuid::new_v4()
        )),
        "SEND" => Some(format!(
            "MESSAGE\ndestination:{}\nmessage-id:{}\n\n{}",
            destination?,
            uuid::Uuid::new_v4(),
            body
        )),
        _ => None,
    }
}

impl MemoryPeer {
    /// Next text frame written by the client, or `None` once the client
    /// closed or dropped the link.
    pub async fn recv(&mut self) -> Option<String> {
        if self.closed_by_client {
            return None;
        }
        match self.commands.recv().await {
            Some(TransportCommand::Send(text)) => Some(text),
            Some(TransportCommand::Close) | None => {
                self.closed_by_client = true;
                None
            }
        }
    }

    /// Non-blocking variant of [`MemoryPeer::recv`].
    pub fn try_recv(&mut self) -> Option<String> {
        if self.closed_by_client {
            return None;
        }
        match self.commands.try_recv() {
            Ok(TransportCommand::Send(text)) => Some(text),
            Ok(TransportCommand::Close) | Err(mpsc::error::TryRecvError::Disconnected) => {
                self.closed_by_client = true;
                None
            }
            Err(mpsc::error::TryRecvError::Empty) => None,
        }
    }

    /// Push a frame to the client. Returns false if the client is gone.
    pub async fn send(&self, text: impl Into<String>) -> bool {
        self.events
            .send(TransportEvent::Message(text.into()))
            .await
            .is_ok()
    }

    /// Push a frame the client cannot read as text.
    pub async fn send_malformed(&self, reason: impl Into<String>) -> bool {
        self.events
            .send(TransportEvent::Malformed(reason.into()))
            .await
            .is_ok()
    }

    /// Report a transport error to the client.
    pub async fn fail(&self, message: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Error(message.into())).await;
    }

    /// Close the link from the server side.
    pub async fn close(self, reason: impl Into<String>) {
        let _ = self
            .events
            .send(TransportEvent::Closed(CloseReason::with_code(1000, reason)))
            .await;
    }

    /// Whether the client closed or dropped the link.
    pub fn is_closed(&self) -> bool {
        self.closed_by_client || self.events.is_closed()
    }
}
