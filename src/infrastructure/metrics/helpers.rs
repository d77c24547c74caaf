//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use crate::connection_manager::ConnectionState;

use super::{
    CONNECTIONS_ESTABLISHED_TOTAL, CONNECTION_FAILURES_TOTAL, CONNECTION_STATE,
    FRAMES_DROPPED_TOTAL, FRAMES_RECEIVED_TOTAL, FRAMES_SENT_TOTAL, HANDLER_FAILURES_TOTAL,
    HEARTBEAT_RTT, HEARTBEAT_TIMEOUTS_TOTAL, MESSAGES_DELIVERED_TOTAL, OUTBOX_DROPPED_TOTAL,
    PROTOCOL_ERRORS_TOTAL, RECONNECT_ATTEMPTS_TOTAL, RESUBSCRIPTIONS_TOTAL,
    RETRIES_EXHAUSTED_TOTAL, SUBSCRIPTIONS_ACTIVE,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_state(state: ConnectionState) {
        CONNECTION_STATE.set(state.as_gauge());
    }

    pub fn record_established() {
        CONNECTIONS_ESTABLISHED_TOTAL.inc();
    }

    pub fn record_reconnect_attempt() {
        RECONNECT_ATTEMPTS_TOTAL.inc();
    }

    pub fn record_exhausted() {
        RETRIES_EXHAUSTED_TOTAL.inc();
    }

    pub fn record_failure(code: &str) {
        CONNECTION_FAILURES_TOTAL.with_label_values(&[code]).inc();
    }
}

/// Helper struct for recording frame traffic
pub struct FrameMetrics;

impl FrameMetrics {
    pub fn record_sent() {
        FRAMES_SENT_TOTAL.inc();
    }

    pub fn record_received() {
        FRAMES_RECEIVED_TOTAL.inc();
    }

    /// Frame addressed to a destination with no subscription
    pub fn record_unrouted() {
        FRAMES_DROPPED_TOTAL.with_label_values(&["unrouted"]).inc();
    }

    pub fn record_protocol_error() {
        PROTOCOL_ERRORS_TOTAL.inc();
        FRAMES_DROPPED_TOTAL.with_label_values(&["malformed"]).inc();
    }

    pub fn record_delivered() {
        MESSAGES_DELIVERED_TOTAL.inc();
    }

    pub fn record_handler_failure() {
        HANDLER_FAILURES_TOTAL.inc();
    }

    pub fn record_outbox_dropped() {
        OUTBOX_DROPPED_TOTAL.inc();
    }
}

/// Helper struct for recording subscription metrics
pub struct SubscriptionMetrics;

impl SubscriptionMetrics {
    pub fn set_active(count: usize) {
        SUBSCRIPTIONS_ACTIVE.set(count as i64);
    }

    pub fn record_resubscribed(count: usize) {
        RESUBSCRIPTIONS_TOTAL.inc_by(count as u64);
    }
}

/// Helper struct for recording heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    pub fn record_rtt(rtt: Duration) {
        HEARTBEAT_RTT.observe(rtt.as_secs_f64());
    }

    pub fn record_timeout() {
        HEARTBEAT_TIMEOUTS_TOTAL.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics_contains_prefix() {
        FrameMetrics::record_received();
        ConnectionMetrics::record_state(ConnectionState::Connected);
        let output = encode_metrics().unwrap();
        assert!(output.contains("realtime_frames_received_total"));
        assert!(output.contains("realtime_connection_state"));
    }
}
