//! Retry policy for establishing upstream calls.
//!
//! Only the request/response handshake is retried. Once a streaming body has
//! started flowing it is never replayed.

use std::time::Duration;

use quill_types::ApiError;
use rand::Rng;

/// How often and how patiently a failed upstream call is attempted again.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Growth of the delay per attempt.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Total attempts a call may make.
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Whether attempt number `attempt` (zero-based) may be followed by
    /// another after failing with `error`.
    pub fn should_retry(&self, error: &ApiError, attempt: u32) -> bool {
        attempt < self.max_retries && is_transient(error)
    }

    /// Pause before the attempt after `attempt`.
    ///
    /// A server-provided `Retry-After` wins over backoff. Either way the
    /// result never exceeds `max_delay`.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(wait) = retry_after {
            return wait.min(self.max_delay);
        }
        let grown = self
            .initial_delay
            .mul_f64(self.backoff_factor.powi(attempt as i32))
            .min(self.max_delay);
        grown
            .mul_f64(rand::rng().random_range(0.75..=1.25))
            .min(self.max_delay)
    }
}

/// Rate limits, 5xx, connection failures and timeouts.
fn is_transient(error: &ApiError) -> bool {
    matches!(
        error,
        ApiError::RateLimited { .. }
            | ApiError::Server { .. }
            | ApiError::Network(_)
            | ApiError::Timeout
    )
}
