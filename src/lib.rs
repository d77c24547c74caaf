// Infrastructure layer (shared components)
pub mod infrastructure;

pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::metrics;

// Wire level
pub mod protocol;
pub mod transport;

// Connection core
pub mod connection_manager;
pub mod heartbeat;
pub mod reconnect;
pub mod router;
pub mod subscription;

// Application layer
pub mod api;

// Supporting modules
pub mod telemetry;

pub use connection_manager::{
    ConnectionEvent, ConnectionManager, ConnectionState, ConnectionStats, ManagerConfig,
};
pub use error::{ClientError, Result};
pub use router::InboundMessage;
pub use subscription::{MessageHandler, SubscriptionHandle};
pub use transport::{Credentials, MemoryServer, MemoryTransport, Transport, WebSocketTransport};
