//! Reconnection policy: backoff delays, retry counting and cooldown restarts.

mod backoff;
mod policy;

pub use backoff::{jitter_factor, BackoffConfig, ExponentialBackoff, JITTER_MAX, JITTER_MIN};
pub use policy::{PolicyState, ReconnectPolicy, RetryDecision, RetryState};
