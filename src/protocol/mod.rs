//! Wire protocol adapters.
//!
//! The connection manager speaks in [`ClientFrame`] and [`ServerFrame`]
//! values; a [`WireProtocol`] turns them into text frames and back. Two
//! adapters are provided:
//!
//! - `Json`: a tagged JSON envelope (`{"type": "subscribe", ...}`)
//! - `Stomp`: STOMP 1.2 text frames, as served by SockJS/STOMP brokers

mod json;
mod stomp;

use serde_json::Value;
use thiserror::Error;

use crate::config::ProtocolKind;

/// Error decoding or encoding a single frame
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unknown frame type: {0}")]
    UnknownFrame(String),

    #[error("missing header `{0}`")]
    MissingHeader(&'static str),

    #[error("invalid JSON payload: {0}")]
    InvalidPayload(String),
}

/// Frames the client sends to the server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// Protocol handshake, sent once the transport is open
    Connect {
        identity: String,
        token: Option<String>,
        host: String,
        heartbeat_ms: u64,
    },
    Subscribe {
        channel: String,
    },
    Unsubscribe {
        channel: String,
    },
    Send {
        channel: String,
        payload: Value,
    },
    /// Liveness probe
    Ping {
        nonce: u64,
    },
}

impl ClientFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::Connect { .. } => "connect",
            ClientFrame::Subscribe { .. } => "subscribe",
            ClientFrame::Unsubscribe { .. } => "unsubscribe",
            ClientFrame::Send { .. } => "send",
            ClientFrame::Ping { .. } => "ping",
        }
    }
}

/// Body of an inbound message, before payload deserialization
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    /// Already parsed by the envelope codec
    Json(Value),
    /// Raw body text, parsed by the router
    Text(String),
}

impl MessageBody {
    /// Deserialize the body into a JSON value.
    pub fn into_json(self) -> Result<Value, ProtocolError> {
        match self {
            MessageBody::Json(value) => Ok(value),
            MessageBody::Text(text) if text.trim().is_empty() => Ok(Value::Null),
            MessageBody::Text(text) => serde_json::from_str(&text)
                .map_err(|e| ProtocolError::InvalidPayload(e.to_string())),
        }
    }
}

/// Frames the server sends to the client
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Handshake confirmation; the connection is protocol-ready
    Connected { session_id: Option<String> },
    Message {
        destination: String,
        body: MessageBody,
    },
    /// Liveness acknowledgement. `nonce` is `None` for protocols without
    /// probe correlation.
    Pong { nonce: Option<u64> },
    /// Server-initiated keepalive
    Heartbeat,
    Subscribed { channels: Vec<String> },
    Unsubscribed { channels: Vec<String> },
    Receipt { id: String },
    Error { code: String, message: String },
}

/// Swappable wire protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireProtocol {
    Json,
    Stomp,
}

impl WireProtocol {
    pub fn name(&self) -> &'static str {
        match self {
            WireProtocol::Json => "json",
            WireProtocol::Stomp => "stomp",
        }
    }

    /// Encode a client frame into a text frame.
    pub fn encode(&self, frame: &ClientFrame) -> Result<String, ProtocolError> {
        match self {
            WireProtocol::Json => json::encode(frame),
            WireProtocol::Stomp => Ok(stomp::encode(frame)),
        }
    }

    /// Decode a text frame received from the server.
    pub fn decode(&self, text: &str) -> Result<ServerFrame, ProtocolError> {
        match self {
            WireProtocol::Json => json::decode(text),
            WireProtocol::Stomp => stomp::decode(text),
        }
    }
}

impl From<ProtocolKind> for WireProtocol {
    fn from(kind: ProtocolKind) -> Self {
        match kind {
            ProtocolKind::Json => WireProtocol::Json,
            ProtocolKind::Stomp => WireProtocol::Stomp,
        }
    }
}
