//! Duplex transport abstraction.
//!
//! A [`Transport`] opens [`TransportLink`]s. A successful `open` is the
//! "open" event; everything after that arrives on the link's event channel.
//! The connection manager never talks to sockets directly, so the concrete
//! implementation is swappable:
//!
//! - `WebSocketTransport`: tokio-tungstenite client
//! - `MemoryTransport`: in-process pair used for local runs and tests

mod memory;
mod websocket;

pub use memory::{MemoryPeer, MemoryServer, MemoryTransport};
pub use websocket::WebSocketTransport;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{TransportConfig, TransportKind};
use crate::error::ClientError;
use crate::protocol::WireProtocol;

/// Capacity of the per-link event channel
pub const LINK_EVENT_BUFFER: usize = 64;

/// Credentials presented when opening a link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub identity: String,
    pub token: Option<String>,
}

impl Credentials {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

impl From<&str> for Credentials {
    fn from(identity: &str) -> Self {
        Credentials::new(identity)
    }
}

impl From<String> for Credentials {
    fn from(identity: String) -> Self {
        Credentials::new(identity)
    }
}

/// Why a link closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseReason {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
        }
    }

    pub fn with_code(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: reason.into(),
        }
    }
}

/// Events emitted by an open link
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(String),
    /// A frame arrived that cannot be read as text
    Malformed(String),
    Error(String),
    Closed(CloseReason),
}

/// Commands consumed by the side of the link that owns the socket
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCommand {
    Send(String),
    Close,
}

/// An open duplex link.
///
/// Dropping the link without calling [`TransportLink::close`] still tears
/// the connection down: the command channel closes and the pump task exits.
pub struct TransportLink {
    id: Uuid,
    commands: mpsc::UnboundedSender<TransportCommand>,
    events: mpsc::Receiver<TransportEvent>,
    pump: Option<JoinHandle<()>>,
}

impl TransportLink {
    pub fn new(
        commands: mpsc::UnboundedSender<TransportCommand>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            commands,
            events,
            pump: None,
        }
    }

    /// Attach the task driving the underlying socket so `close` can reap it.
    pub fn with_pump(mut self, pump: JoinHandle<()>) -> Self {
        self.pump = Some(pump);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a text frame for the peer.
    pub fn send(&self, text: String) -> Result<(), ClientError> {
        self.commands
            .send(TransportCommand::Send(text))
            .map_err(|_| ClientError::ConnectionClosed("transport link is closed".to_string()))
    }

    /// Next event, or `None` once the link is gone.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Close the link. No further events are read from it.
    pub fn close(mut self) {
        let _ = self.commands.send(TransportCommand::Close);
        self.events.close();
        if let Some(pump) = self.pump.take() {
            // The pump flushes the close frame on its own; abort only if it lingers
            let abort = pump.abort_handle();
            tokio::spawn(async move {
                if tokio::time::timeout(std::time::Duration::from_secs(5), pump)
                    .await
                    .is_err()
                {
                    tracing::debug!("Transport pump did not exit after close, aborting");
                    abort.abort();
                }
            });
        }
    }
}

/// Opens links to a server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Open a new link.
    ///
    /// Fails with `InvalidUrl` for malformed endpoints, `ConnectionRefused`
    /// when the peer cannot be reached and `Timeout` when connecting takes
    /// too long.
    async fn open(&self, url: &str, credentials: &Credentials)
        -> Result<TransportLink, ClientError>;
}

/// Build the transport selected in configuration.
///
/// `Memory` pairs the transport with a loopback broker speaking `protocol`,
/// which confirms handshakes and echoes sent payloads. Must be called from
/// within a tokio runtime.
pub fn create_transport(config: &TransportConfig, protocol: WireProtocol) -> Arc<dyn Transport> {
    match config.kind {
        TransportKind::Websocket => {
            tracing::info!("Using WebSocket transport");
            Arc::new(WebSocketTransport::new(config.connect_timeout()))
        }
        TransportKind::Memory => {
            tracing::info!(protocol = protocol.name(), "Using in-memory loopback transport");
            let (transport, server) = MemoryTransport::pair();
            server.spawn_loopback(protocol);
            Arc::new(transport)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_link_send_and_close() {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let (_event_tx, event_rx) = mpsc::channel(LINK_EVENT_BUFFER);
        let link = TransportLink::new(cmd_tx, event_rx);

        link.send("hello".to_string()).unwrap();
        link.close();

        assert_eq!(
            cmd_rx.recv().await,
            Some(TransportCommand::Send("hello".to_string()))
        );
        assert_eq!(cmd_rx.recv().await, Some(TransportCommand::Close));
        assert_eq!(cmd_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_link_send_after_peer_gone() {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (_event_tx, event_rx) = mpsc::channel(LINK_EVENT_BUFFER);
        let link = TransportLink::new(cmd_tx, event_rx);
        drop(cmd_rx);

        assert!(matches!(
            link.send("x".to_string()),
            Err(ClientError::ConnectionClosed(_))
        ));
    }

    #[test]
    fn test_next_event_waits_for_peer() {
        let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(LINK_EVENT_BUFFER);
        let mut link = TransportLink::new(cmd_tx, event_rx);

        let mut next = tokio_test::task::spawn(link.next_event());
        tokio_test::assert_pending!(next.poll());

        event_tx
            .try_send(TransportEvent::Message("hi".to_string()))
            .unwrap();
        assert!(next.is_woken());
        tokio_test::assert_ready_eq!(
            next.poll(),
            Some(TransportEvent::Message("hi".to_string()))
        );
    }

    #[test]
    fn test_credentials_builder() {
        let creds = Credentials::new("42").with_token("t");
        assert_eq!(creds.identity, "42");
        assert_eq!(creds.token.as_deref(), Some("t"));
    }
}
