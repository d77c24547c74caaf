//! Liveness probing for half-open connection detection.
//!
//! The monitor is a pure bookkeeping object: the connection loop owns the
//! timers and calls [`HeartbeatMonitor::probe`] when the probe interval
//! elapses and [`HeartbeatMonitor::expire`] when the acknowledgement window
//! closes. Probes are only sent while the connection is Connected.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::HeartbeatConfig;
use crate::metrics::HeartbeatMetrics;

/// Floor for the probe interval and the acknowledgement window
pub const MIN_HEARTBEAT_PERIOD: Duration = Duration::from_millis(100);

fn at_least_min(name: &'static str, period: Duration) -> Duration {
    if period < MIN_HEARTBEAT_PERIOD {
        tracing::warn!(
            setting = name,
            configured_ms = period.as_millis() as u64,
            min_ms = MIN_HEARTBEAT_PERIOD.as_millis() as u64,
            "Heartbeat period too short, using the minimum"
        );
        return MIN_HEARTBEAT_PERIOD;
    }
    period
}

#[derive(Debug, Clone, Copy)]
struct Probe {
    nonce: u64,
    sent_at: Instant,
}

/// Heartbeat counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeartbeatStats {
    pub probes_sent: u64,
    pub acknowledged: u64,
    pub timeouts: u64,
    pub last_rtt_ms: Option<u64>,
}

pub struct HeartbeatMonitor {
    enabled: bool,
    interval: Duration,
    timeout: Duration,
    running: bool,
    next_nonce: u64,
    outstanding: Option<Probe>,
    stats: HeartbeatStats,
}

impl HeartbeatMonitor {
    pub fn new(config: &HeartbeatConfig) -> Self {
        Self {
            enabled: config.enabled,
            interval: at_least_min("interval", config.interval()),
            timeout: at_least_min("timeout", config.timeout()),
            running: false,
            next_nonce: 1,
            outstanding: None,
            stats: HeartbeatStats::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stats(&self) -> &HeartbeatStats {
        &self.stats
    }

    /// Begin monitoring a freshly connected link. Returns false when
    /// heartbeats are disabled.
    pub fn start(&mut self) -> bool {
        self.outstanding = None;
        self.running = self.enabled;
        if self.running {
            tracing::debug!(
                interval_ms = self.interval.as_millis() as u64,
                timeout_ms = self.timeout.as_millis() as u64,
                "Heartbeat monitor started"
            );
        }
        self.running
    }

    pub fn stop(&mut self) {
        if self.running {
            tracing::debug!("Heartbeat monitor stopped");
        }
        self.running = false;
        self.outstanding = None;
    }

    /// Register a new probe and return its nonce.
    ///
    /// Returns `None` when not running or while a probe is still awaiting
    /// its acknowledgement.
    pub fn probe(&mut self, now: Instant) -> Option<u64> {
        if !self.running || self.outstanding.is_some() {
            return None;
        }
        let nonce = self.next_nonce;
        self.next_nonce = self.next_nonce.wrapping_add(1);
        self.outstanding = Some(Probe {
            nonce,
            sent_at: now,
        });
        self.stats.probes_sent += 1;
        tracing::trace!(nonce, "Heartbeat probe sent");
        Some(nonce)
    }

    pub fn is_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Match an acknowledgement against the outstanding probe.
    ///
    /// `None` nonce acknowledges whatever probe is outstanding. Returns the
    /// round-trip time when it matched.
    pub fn acknowledge(&mut self, nonce: Option<u64>, now: Instant) -> Option<Duration> {
        let probe = self.outstanding?;
        if let Some(nonce) = nonce {
            if nonce != probe.nonce {
                tracing::debug!(nonce, expected = probe.nonce, "Ignoring pong for stale probe");
                return None;
            }
        }

        self.outstanding = None;
        let rtt = now.saturating_duration_since(probe.sent_at);
        self.stats.acknowledged += 1;
        self.stats.last_rtt_ms = Some(rtt.as_millis() as u64);
        HeartbeatMetrics::record_rtt(rtt);
        tracing::trace!(nonce = probe.nonce, rtt_ms = rtt.as_millis() as u64, "Heartbeat acknowledged");
        Some(rtt)
    }

    /// The acknowledgement window closed. Returns true when a probe was
    /// still outstanding, i.e. the connection is dead.
    pub fn expire(&mut self) -> bool {
        if !self.running {
            return false;
        }
        match self.outstanding.take() {
            Some(probe) => {
                self.stats.timeouts += 1;
                HeartbeatMetrics::record_timeout();
                tracing::warn!(
                    nonce = probe.nonce,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Heartbeat not acknowledged, connection considered dead"
                );
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HeartbeatMonitor {
        HeartbeatMonitor::new(&HeartbeatConfig {
            enabled: true,
            interval_ms: 30_000,
            timeout_ms: 10_000,
        })
    }

    #[test]
    fn test_no_probe_until_started() {
        let mut hb = monitor();
        assert_eq!(hb.probe(Instant::now()), None);
        assert!(hb.start());
        assert!(hb.probe(Instant::now()).is_some());
    }

    #[test]
    fn test_zero_periods_are_raised_to_minimum() {
        let hb = HeartbeatMonitor::new(&HeartbeatConfig {
            enabled: true,
            interval_ms: 0,
            timeout_ms: 0,
        });
        assert_eq!(hb.interval(), MIN_HEARTBEAT_PERIOD);
        assert_eq!(hb.timeout(), MIN_HEARTBEAT_PERIOD);

        let hb = monitor();
        assert_eq!(hb.interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_disabled_never_runs() {
        let mut hb = HeartbeatMonitor::new(&HeartbeatConfig {
            enabled: false,
            ..HeartbeatConfig::default()
        });
        assert!(!hb.start());
        assert_eq!(hb.probe(Instant::now()), None);
    }

    #[test]
    fn test_ack_records_rtt() {
        let mut hb = monitor();
        hb.start();
        let sent = Instant::now();
        let nonce = hb.probe(sent).unwrap();

        let rtt = hb.acknowledge(Some(nonce), sent + Duration::from_millis(40));
        assert_eq!(rtt, Some(Duration::from_millis(40)));
        assert!(!hb.is_outstanding());
        assert_eq!(hb.stats().last_rtt_ms, Some(40));
        assert!(!hb.expire());
    }

    #[test]
    fn test_mismatched_nonce_is_ignored() {
        let mut hb = monitor();
        hb.start();
        let nonce = hb.probe(Instant::now()).unwrap();

        assert_eq!(hb.acknowledge(Some(nonce + 100), Instant::now()), None);
        assert!(hb.is_outstanding());
        assert!(hb.expire());
        assert_eq!(hb.stats().timeouts, 1);
    }

    #[test]
    fn test_uncorrelated_ack_matches_outstanding() {
        let mut hb = monitor();
        hb.start();
        hb.probe(Instant::now());
        assert!(hb.acknowledge(None, Instant::now()).is_some());
        // Nothing outstanding: further acks are no-ops
        assert!(hb.acknowledge(None, Instant::now()).is_none());
    }

    #[test]
    fn test_one_probe_in_flight() {
        let mut hb = monitor();
        hb.start();
        let first = hb.probe(Instant::now()).unwrap();
        assert_eq!(hb.probe(Instant::now()), None);
        hb.acknowledge(Some(first), Instant::now());
        assert_eq!(hb.probe(Instant::now()), Some(first + 1));
    }

    #[test]
    fn test_stop_clears_outstanding() {
        let mut hb = monitor();
        hb.start();
        hb.probe(Instant::now());
        hb.stop();
        assert!(!hb.is_outstanding());
        assert!(!hb.expire());
    }
}
