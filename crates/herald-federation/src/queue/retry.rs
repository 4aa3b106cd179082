//! Retry policy for transaction delivery.

use std::time::Duration;

use herald_common::config::FederationConfig;

/// How hard a destination queue tries before giving up on a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deadline for a single send attempt.
    pub request_timeout: Duration,
    /// Resends of one transaction after its first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Pause before retry number `attempt` (0-based): doubles each time, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .checked_mul(2u32.saturating_pow(attempt))
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl From<&FederationConfig> for RetryPolicy {
    fn from(cfg: &FederationConfig) -> Self {
        Self {
            request_timeout: cfg.request_timeout(),
            max_retries: cfg.max_retries,
            initial_backoff: cfg.initial_backoff(),
            max_backoff: cfg.max_backoff(),
        }
    }
}
