//! Reconnection state machine.
//!
//! ```text
//! Idle -> Connecting -> Connected -> Backoff -> Connecting -> ... -> Failed
//!                                                                  |
//!                        Connecting <---- cooldown elapsed --------+
//! ```

use std::time::Duration;

use super::backoff::{BackoffConfig, ExponentialBackoff};
use crate::config::ReconnectConfig;

/// Policy state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyState {
    Idle,
    Connecting,
    Connected,
    Backoff,
    Failed,
}

impl PolicyState {
    /// Whether `self -> to` is a legal transition.
    fn can_transition(self, to: PolicyState) -> bool {
        use PolicyState::*;
        matches!(
            (self, to),
            (_, Idle)
                | (Idle, Connecting)
                | (Connecting, Connected)
                | (Connecting, Backoff)
                | (Connecting, Failed)
                | (Connected, Backoff)
                | (Connected, Failed)
                | (Backoff, Connecting)
                | (Failed, Connecting)
        )
    }
}

/// Retry bookkeeping for the current cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    pub retry_count: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

/// Outcome of a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then make attempt number `attempt` of this cycle
    Retry { attempt: u32, delay: Duration },
    /// The cycle is exhausted; a fresh cycle starts after `cooldown`
    Cooldown { attempts: u32, cooldown: Duration },
    /// The cycle is exhausted and no restarts remain
    GiveUp { attempts: u32 },
    /// Failure reported in a state where none was expected
    Ignored,
}

/// Decides when and whether to reconnect.
///
/// Owned by the connection event loop; not shared.
#[derive(Debug)]
pub struct ReconnectPolicy {
    state: PolicyState,
    retry: RetryState,
    backoff: ExponentialBackoff,
    cooldown: Duration,
    max_cycle_restarts: u32,
    restarts_used: u32,
}

impl ReconnectPolicy {
    pub fn new(config: &ReconnectConfig) -> Self {
        let backoff = ExponentialBackoff::new(BackoffConfig {
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            jitter: config.jitter,
        });
        Self {
            state: PolicyState::Idle,
            retry: RetryState {
                retry_count: 0,
                base_delay: config.base_delay(),
                max_delay: config.max_delay(),
                max_attempts: config.max_attempts.max(1),
            },
            backoff,
            cooldown: config.cooldown(),
            max_cycle_restarts: config.max_cycle_restarts,
            restarts_used: 0,
        }
    }

    pub fn state(&self) -> PolicyState {
        self.state
    }

    pub fn retry_state(&self) -> &RetryState {
        &self.retry
    }

    pub fn retry_count(&self) -> u32 {
        self.retry.retry_count
    }

    fn transition(&mut self, to: PolicyState) -> bool {
        if !self.state.can_transition(to) {
            tracing::warn!(from = ?self.state, to = ?to, "Ignoring illegal reconnect transition");
            return false;
        }
        tracing::trace!(from = ?self.state, to = ?to, "Reconnect policy transition");
        self.state = to;
        true
    }

    /// Host-initiated connect. Starts a fresh cycle with a full restart budget.
    pub fn begin(&mut self) -> bool {
        if !matches!(self.state, PolicyState::Idle | PolicyState::Failed) {
            tracing::warn!(state = ?self.state, "Connect requested while already active");
            return false;
        }
        if !self.transition(PolicyState::Connecting) {
            return false;
        }
        self.retry.retry_count = 0;
        self.restarts_used = 0;
        true
    }

    /// Backoff timer fired; the next attempt starts now.
    pub fn on_retry_due(&mut self) -> bool {
        if self.state != PolicyState::Backoff {
            tracing::warn!(state = ?self.state, "Retry timer fired outside of backoff");
            return false;
        }
        self.transition(PolicyState::Connecting)
    }

    /// Protocol handshake confirmed. The only place the retry count resets.
    pub fn on_connected(&mut self) -> bool {
        if !self.transition(PolicyState::Connected) {
            return false;
        }
        self.retry.retry_count = 0;
        self.restarts_used = 0;
        true
    }

    /// An attempt failed, or an established connection dropped.
    pub fn on_failure(&mut self) -> RetryDecision {
        if !matches!(self.state, PolicyState::Connecting | PolicyState::Connected) {
            tracing::warn!(state = ?self.state, "Failure reported while not connecting");
            return RetryDecision::Ignored;
        }

        let delay = self.backoff.delay(self.retry.retry_count);
        self.retry.retry_count = self.retry.retry_count.saturating_add(1);

        if self.retry.retry_count >= self.retry.max_attempts {
            self.transition(PolicyState::Failed);
            let attempts = self.retry.retry_count;
            if self.restarts_used < self.max_cycle_restarts {
                return RetryDecision::Cooldown {
                    attempts,
                    cooldown: self.cooldown,
                };
            }
            return RetryDecision::GiveUp { attempts };
        }

        self.transition(PolicyState::Backoff);
        RetryDecision::Retry {
            attempt: self.retry.retry_count + 1,
            delay,
        }
    }

    /// Cooldown elapsed after exhaustion: start one more cycle from zero.
    pub fn on_cooldown_elapsed(&mut self) -> bool {
        if self.state != PolicyState::Failed || self.restarts_used >= self.max_cycle_restarts {
            tracing::warn!(
                state = ?self.state,
                restarts_used = self.restarts_used,
                "Cooldown elapsed but no restart is available"
            );
            return false;
        }
        if !self.transition(PolicyState::Connecting) {
            return false;
        }
        self.restarts_used += 1;
        self.retry.retry_count = 0;
        true
    }

    /// Host-initiated disconnect.
    pub fn reset(&mut self) {
        self.transition(PolicyState::Idle);
        self.retry.retry_count = 0;
        self.restarts_used = 0;
    }
}
