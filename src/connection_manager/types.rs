//! Connection state and lifecycle events

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::error::ClientError;

/// Externally visible connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }

    /// Numeric value exported by the state gauge
    pub fn as_gauge(&self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::Failed => 4,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle events published to the host application
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A fresh attempt cycle started
    Connecting,
    /// Handshake confirmed and subscriptions resubmitted
    Connected {
        connection_id: Uuid,
        session_id: Option<String>,
    },
    /// The connection was lost or an attempt failed; `attempt` starts after `delay`
    Reconnecting {
        attempt: u32,
        delay: Duration,
        error: ClientError,
    },
    /// No further automatic attempts until the cooldown elapses, or at all
    Failed(ClientError),
    /// Torn down by the host
    Disconnected,
}

impl ConnectionEvent {
    /// State the connection is in after this event
    pub fn state(&self) -> ConnectionState {
        match self {
            ConnectionEvent::Connecting => ConnectionState::Connecting,
            ConnectionEvent::Connected { .. } => ConnectionState::Connected,
            ConnectionEvent::Reconnecting { .. } => ConnectionState::Reconnecting,
            ConnectionEvent::Failed(_) => ConnectionState::Failed,
            ConnectionEvent::Disconnected => ConnectionState::Disconnected,
        }
    }
}
