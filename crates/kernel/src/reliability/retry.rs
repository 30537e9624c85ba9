//! Retry policy: exponential backoff with jitter.
//!
//! Defaults come from `[retry]` in the config (base 1 s, multiplier 2,
//! cap 60 s, 3 attempts). Jitter spreads retries across ±25% of the
//! computed delay so racing instances do not stampede the same node.

use std::time::Duration;

use ms_domain::config::RetryConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_multiplier: u32,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_base: Duration::from_secs(config.backoff_base_secs),
            backoff_multiplier: config.backoff_multiplier,
            max_backoff: Duration::from_secs(config.max_backoff_secs),
        }
    }

    /// Whether a failed `attempt` (1-based) may be retried.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff before retrying after failed attempt `attempt`:
    /// `base * multiplier^(attempt-1)`, capped, then jittered.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = u64::from(self.backoff_multiplier).saturating_pow(exponent);
        let raw = self
            .backoff_base
            .saturating_mul(factor.min(u64::from(u32::MAX)) as u32);
        let capped = raw.min(self.max_backoff);
        jitter(capped)
    }
}

/// Spread a delay across [0.75, 1.25) of its nominal value. Entropy
/// comes from a fresh v4 UUID, which keeps the dependency set flat.
fn jitter(delay: Duration) -> Duration {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    let seed = u64::from_le_bytes(bytes[..8].try_into().expect("uuid has 16 bytes"));
    let fraction = (seed % 1000) as f64 / 1000.0;
    delay.mul_f64(0.75 + fraction * 0.5)
}
