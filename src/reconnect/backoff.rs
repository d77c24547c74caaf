//! Exponential backoff for reconnection attempts

use std::time::Duration;

use rand::Rng;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay for retry 0 in milliseconds
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Scale delays by a uniform factor in [0.5, 1.0)
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000, // 30 seconds
            jitter: true,
        }
    }
}

/// Lower bound of the jitter factor
pub const JITTER_MIN: f64 = 0.5;
/// Exclusive upper bound of the jitter factor
pub const JITTER_MAX: f64 = 1.0;

/// Exponential backoff calculator with jitter.
///
/// Stateless: the retry count lives in the reconnection policy.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// `min(max_delay, base_delay * 2^retry_count)`, before jitter.
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry_count);
        let delay_ms = self
            .config
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.config.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Delay to wait before the attempt following `retry_count` failures.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let capped = self.base_delay(retry_count);
        if !self.config.jitter {
            return capped;
        }
        capped.mul_f64(jitter_factor())
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

/// Uniform random factor in [0.5, 1.0).
pub fn jitter_factor() -> f64 {
    rand::rng().random_range(JITTER_MIN..JITTER_MAX)
}
