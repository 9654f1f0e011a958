//! Reusable retry-with-backoff policy shared by the fetch and provider layers.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Exponential backoff policy: `base * 2^attempt`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound on any single backoff.
    pub max_delay: Duration,
    /// Add up to +25% random jitter to each backoff.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Policy with `max_attempts` attempts and the given base delay.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// Enable random jitter on backoff delays.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Backoff to sleep after the zero-based `attempt` failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter && !delay.is_zero() {
            let extra = rand::rng().random_range(0.0..=0.25);
            delay.mul_f64(1.0 + extra).min(self.max_delay)
        } else {
            delay
        }
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or attempts run out.
    ///
    /// `op` receives the zero-based attempt number. The last error is returned on
    /// exhaustion.
    pub async fn retry<T, E, F, Fut>(&self, mut op: F, is_retryable: impl Fn(&E) -> bool) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let last = attempt + 1 >= attempts;
                    if last || !is_retryable(&e) {
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt);
                    debug!(attempt = attempt + 1, attempts, delay_ms = delay.as_millis(), "retrying after backoff");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
