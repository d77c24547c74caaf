mod settings;

pub use settings::{
    ClientConfig, HeartbeatConfig, OpsConfig, OtelConfig, ProtocolKind, ReconnectConfig,
    Settings, TransportConfig, TransportKind,
};
