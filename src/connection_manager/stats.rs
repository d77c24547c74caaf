//! Connection statistics

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::scheduler::TimerKind;
use super::types::ConnectionState;
use crate::heartbeat::HeartbeatStats;
use crate::router::RouterStats;
use crate::subscription::SubscriptionInfo;

/// Snapshot of a connection manager
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    /// Id of the live transport link
    pub connection_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub connected_since: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub subscriptions: Vec<SubscriptionInfo>,
    /// Subscribe/unsubscribe calls waiting for the connection
    pub queued_subscription_ops: usize,
    /// Sends waiting for the connection
    pub outbox_len: usize,
    pub outbox_dropped: u64,
    pub connections_established: u64,
    pub connect_attempts: u64,
    pub frames_sent: u64,
    pub router: RouterStats,
    pub heartbeat: HeartbeatStats,
    pub armed_timers: Vec<TimerKind>,
}

/// Counters kept by the connection loop itself
#[derive(Debug, Clone, Default)]
pub(crate) struct LoopCounters {
    pub connections_established: u64,
    pub connect_attempts: u64,
    pub frames_sent: u64,
    pub outbox_dropped: u64,
}
