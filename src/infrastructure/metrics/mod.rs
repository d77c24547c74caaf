//! Prometheus metrics for the realtime client.
//!
//! This module provides metrics for monitoring a client connection:
//! - Connection metrics (state, established connections, reconnect attempts)
//! - Frame metrics (sent, received, dropped by reason)
//! - Delivery metrics (handler failures, protocol errors)
//! - Heartbeat metrics (round-trip time, timeouts)

mod helpers;

pub use helpers::{
    encode_metrics, ConnectionMetrics, FrameMetrics, HeartbeatMetrics, SubscriptionMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "realtime";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Current connection state (0=disconnected, 1=connecting, 2=connected, 3=reconnecting, 4=failed)
    pub static ref CONNECTION_STATE: IntGauge = register_int_gauge!(
        format!("{}_connection_state", METRIC_PREFIX),
        "Current connection state (0=disconnected, 1=connecting, 2=connected, 3=reconnecting, 4=failed)"
    ).unwrap();

    /// Total protocol handshakes completed
    pub static ref CONNECTIONS_ESTABLISHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_established_total", METRIC_PREFIX),
        "Total connections that completed the protocol handshake"
    ).unwrap();

    /// Total reconnection attempts
    pub static ref RECONNECT_ATTEMPTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reconnect_attempts_total", METRIC_PREFIX),
        "Total reconnection attempts"
    ).unwrap();

    /// Total times the retry budget was exhausted
    pub static ref RETRIES_EXHAUSTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_retries_exhausted_total", METRIC_PREFIX),
        "Total times the reconnection policy entered the failed state"
    ).unwrap();

    /// Connection failures by error code
    pub static ref CONNECTION_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connection_failures_total", METRIC_PREFIX),
        "Connection failures by error code",
        &["code"]
    ).unwrap();

    // ============================================================================
    // Frame Metrics
    // ============================================================================

    /// Frames written to the transport
    pub static ref FRAMES_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_frames_sent_total", METRIC_PREFIX),
        "Total frames written to the transport"
    ).unwrap();

    /// Frames read from the transport
    pub static ref FRAMES_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_frames_received_total", METRIC_PREFIX),
        "Total frames read from the transport"
    ).unwrap();

    /// Frames dropped by reason
    pub static ref FRAMES_DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_frames_dropped_total", METRIC_PREFIX),
        "Frames dropped by reason",
        &["reason"]
    ).unwrap();

    /// Messages delivered to subscription handlers
    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total messages delivered to subscription handlers"
    ).unwrap();

    /// Subscription handler failures (errors and panics)
    pub static ref HANDLER_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_handler_failures_total", METRIC_PREFIX),
        "Total subscription handler failures"
    ).unwrap();

    /// Malformed inbound frames
    pub static ref PROTOCOL_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_protocol_errors_total", METRIC_PREFIX),
        "Total malformed inbound frames"
    ).unwrap();

    /// Outbound frames discarded because the outbox was full
    pub static ref OUTBOX_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_outbox_dropped_total", METRIC_PREFIX),
        "Outbound frames discarded because the outbox was full"
    ).unwrap();

    // ============================================================================
    // Subscription Metrics
    // ============================================================================

    /// Registered subscriptions
    pub static ref SUBSCRIPTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_subscriptions_active", METRIC_PREFIX),
        "Number of registered subscriptions"
    ).unwrap();

    /// Subscriptions resubmitted after a (re)connect
    pub static ref RESUBSCRIPTIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_resubscriptions_total", METRIC_PREFIX),
        "Total subscriptions resubmitted after a (re)connect"
    ).unwrap();

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    /// Heartbeat round-trip time
    pub static ref HEARTBEAT_RTT: Histogram = register_histogram!(
        format!("{}_heartbeat_rtt_seconds", METRIC_PREFIX),
        "Heartbeat probe round-trip time in seconds",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    ).unwrap();

    /// Heartbeat probes that were never acknowledged
    pub static ref HEARTBEAT_TIMEOUTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeat_timeouts_total", METRIC_PREFIX),
        "Total heartbeat probes that were not acknowledged in time"
    ).unwrap();
}
