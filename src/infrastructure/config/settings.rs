use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::error::ClientError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    /// Channels the runner subscribes to on startup
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub ops: OpsConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

/// Wire protocol spoken over the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    #[default]
    Json,
    Stomp,
}

/// Transport implementation backing the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Websocket,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Server endpoint, e.g. `wss://api.example.com/ws`
    #[serde(default = "default_url")]
    pub url: String,
    /// Identity announced in the connect handshake
    #[serde(default = "default_identity")]
    pub identity: String,
    /// Bearer token, if the server requires one
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub protocol: ProtocolKind,
    /// Maximum number of outbound frames buffered while not connected
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    /// Consecutive malformed frames tolerated before the connection is recycled
    #[serde(default = "default_max_protocol_errors")]
    pub max_protocol_errors: u32,
    /// Capacity of the state event broadcast channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first retry in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound of the exponential delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Failed attempts before the policy gives up on the current cycle
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Scale each delay by a random factor in [0.5, 1.0)
    #[serde(default = "default_true")]
    pub jitter: bool,
    /// Wait before the teardown-and-restart cycle after exhaustion
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Automatic restart cycles allowed per `connect()` call
    #[serde(default = "default_max_cycle_restarts")]
    pub max_cycle_restarts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Probe interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,
    /// Time allowed for the acknowledgement of a probe in milliseconds
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,
    /// Transport-level connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Time allowed for the protocol handshake after the socket opens
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ops_host")]
    pub host: String,
    #[serde(default = "default_ops_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
    /// Emit logs as JSON lines instead of the human readable format
    #[serde(default)]
    pub json_logs: bool,
}

fn default_url() -> String {
    "ws://localhost:8081/ws".to_string()
}

fn default_identity() -> String {
    "anonymous".to_string()
}

fn default_outbox_capacity() -> usize {
    256
}

fn default_max_protocol_errors() -> u32 {
    10
}

fn default_event_buffer() -> usize {
    64
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_cooldown_ms() -> u64 {
    10_000
}

fn default_max_cycle_restarts() -> u32 {
    1
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_ops_host() -> String {
    "127.0.0.1".to_string()
}

fn default_ops_port() -> u16 {
    9464
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "ara-realtime-client".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("client.url", default_url())?
            .set_default("client.identity", default_identity())?
            .set_default("reconnect.base_delay_ms", default_base_delay_ms() as i64)?
            .set_default("reconnect.max_delay_ms", default_max_delay_ms() as i64)?
            .set_default("reconnect.max_attempts", default_max_attempts() as i64)?
            .set_default("heartbeat.interval_ms", default_heartbeat_interval_ms() as i64)?
            .set_default("heartbeat.timeout_ms", default_heartbeat_timeout_ms() as i64)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // REALTIME_CLIENT__URL, REALTIME_RECONNECT__MAX_ATTEMPTS, REALTIME_CHANNELS=a,b
            .add_source(
                Environment::with_prefix("REALTIME")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("channels"),
            );

        builder.build()?.try_deserialize()
    }

    /// Reject values the connection manager cannot operate with.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.client.url.trim().is_empty() {
            return Err(ClientError::Config("client.url must not be empty".into()));
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(ClientError::Config(
                "reconnect.base_delay_ms must be greater than zero".into(),
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(ClientError::Config(
                "reconnect.max_delay_ms must be >= reconnect.base_delay_ms".into(),
            ));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(ClientError::Config(
                "reconnect.max_attempts must be greater than zero".into(),
            ));
        }
        if self.heartbeat.enabled
            && (self.heartbeat.interval_ms == 0 || self.heartbeat.timeout_ms == 0)
        {
            return Err(ClientError::Config(
                "heartbeat interval and timeout must be greater than zero".into(),
            ));
        }
        if self.client.event_buffer == 0 {
            return Err(ClientError::Config(
                "client.event_buffer must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn ops_addr(&self) -> String {
        format!("{}:{}", self.ops.host, self.ops.port)
    }
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            identity: default_identity(),
            token: None,
            protocol: ProtocolKind::default(),
            outbox_capacity: default_outbox_capacity(),
            max_protocol_errors: default_max_protocol_errors(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            jitter: true,
            cooldown_ms: default_cooldown_ms(),
            max_cycle_restarts: default_max_cycle_restarts(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_heartbeat_interval_ms(),
            timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_ops_host(),
            port: default_ops_port(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
            json_logs: false,
        }
    }
}
