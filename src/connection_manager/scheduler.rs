//! Named timers owned by the connection loop.
//!
//! Every delayed action of a connection is one entry here, so cancelling a
//! connection means clearing one map.
//!
//! Expiry is handled in passes: [`Scheduler::pass`] marks the timers armed so
//! far, and [`Scheduler::pop_expired`] only yields those. A timer re-armed
//! while its pass runs waits for the next one, even with a zero delay.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Next connection attempt after a backoff delay
    Reconnect,
    /// Fresh attempt cycle after retries were exhausted
    Cooldown,
    /// Protocol handshake must be confirmed before this fires
    Handshake,
    /// Send the next liveness probe
    HeartbeatProbe,
    /// Outstanding probe must be acknowledged before this fires
    HeartbeatTimeout,
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    deadline: Instant,
    seq: u64,
}

/// Marker of one expiry pass, see [`Scheduler::pass`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pass {
    now: Instant,
    armed_before: u64,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    deadlines: HashMap<TimerKind, Armed>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` to fire after `delay`, replacing any previous deadline.
    pub fn arm(&mut self, kind: TimerKind, delay: Duration) {
        self.arm_at(kind, Instant::now() + delay);
    }

    pub fn arm_at(&mut self, kind: TimerKind, deadline: Instant) {
        tracing::trace!(timer = ?kind, "Timer armed");
        let seq = self.next_seq;
        self.next_seq += 1;
        self.deadlines.insert(kind, Armed { deadline, seq });
    }

    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        self.deadlines.remove(&kind).is_some()
    }

    pub fn cancel_all(&mut self) {
        if !self.deadlines.is_empty() {
            tracing::trace!(count = self.deadlines.len(), "Cancelling all timers");
        }
        self.deadlines.clear();
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadlines.contains_key(&kind)
    }

    /// Earliest deadline, if any timer is armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().map(|armed| armed.deadline).min()
    }

    /// Start an expiry pass at `now`.
    pub fn pass(&self, now: Instant) -> Pass {
        Pass {
            now,
            armed_before: self.next_seq,
        }
    }

    /// Remove and return the earliest timer of `pass` whose deadline has
    /// passed. Timers armed after the pass started are left alone.
    pub fn pop_expired(&mut self, pass: Pass) -> Option<TimerKind> {
        let (kind, _) = self
            .deadlines
            .iter()
            .filter(|(_, armed)| armed.seq < pass.armed_before && armed.deadline <= pass.now)
            .min_by_key(|(_, armed)| armed.deadline)?;
        let kind = *kind;
        self.deadlines.remove(&kind);
        Some(kind)
    }

    pub fn armed(&self) -> Vec<TimerKind> {
        let mut armed: Vec<(TimerKind, Instant)> = self
            .deadlines
            .iter()
            .map(|(k, armed)| (*k, armed.deadline))
            .collect();
        armed.sort_by_key(|(_, deadline)| *deadline);
        armed.into_iter().map(|(kind, _)| kind).collect()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_expired_in_deadline_order() {
        let mut scheduler = Scheduler::new();
        let now = Instant::now();
        scheduler.arm_at(TimerKind::HeartbeatProbe, now + Duration::from_secs(30));
        scheduler.arm_at(TimerKind::HeartbeatTimeout, now + Duration::from_secs(10));
        scheduler.arm_at(TimerKind::Handshake, now + Duration::from_secs(5));

        assert_eq!(scheduler.next_deadline(), Some(now + Duration::from_secs(5)));
        assert_eq!(scheduler.pop_expired(scheduler.pass(now)), None);

        let pass = scheduler.pass(now + Duration::from_secs(12));
        assert_eq!(scheduler.pop_expired(pass), Some(TimerKind::Handshake));
        assert_eq!(scheduler.pop_expired(pass), Some(TimerKind::HeartbeatTimeout));
        assert_eq!(scheduler.pop_expired(pass), None);
        assert_eq!(scheduler.armed(), vec![TimerKind::HeartbeatProbe]);
    }

    #[test]
    fn test_timer_rearmed_during_pass_waits_for_next_pass() {
        let mut scheduler = Scheduler::new();
        let now = Instant::now();
        scheduler.arm_at(TimerKind::HeartbeatProbe, now);

        let pass = scheduler.pass(now);
        assert_eq!(scheduler.pop_expired(pass), Some(TimerKind::HeartbeatProbe));
        scheduler.arm_at(TimerKind::HeartbeatProbe, now);
        assert_eq!(scheduler.pop_expired(pass), None);
        assert!(scheduler.is_armed(TimerKind::HeartbeatProbe));

        let next = scheduler.pass(now);
        assert_eq!(scheduler.pop_expired(next), Some(TimerKind::HeartbeatProbe));
    }

    #[test]
    fn test_rearm_replaces_deadline() {
        let mut scheduler = Scheduler::new();
        let now = Instant::now();
        scheduler.arm_at(TimerKind::Reconnect, now + Duration::from_secs(1));
        scheduler.arm_at(TimerKind::Reconnect, now + Duration::from_secs(4));

        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.next_deadline(), Some(now + Duration::from_secs(4)));
    }

    #[test]
    fn test_cancel_all() {
        let mut scheduler = Scheduler::new();
        scheduler.arm(TimerKind::Reconnect, Duration::from_secs(1));
        scheduler.arm(TimerKind::Cooldown, Duration::from_secs(10));
        assert!(scheduler.cancel(TimerKind::Reconnect));
        assert!(!scheduler.cancel(TimerKind::Reconnect));

        scheduler.cancel_all();
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.next_deadline(), None);
    }
}
