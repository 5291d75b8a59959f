//! Transient-failure retry with exponential backoff.

use crate::error::ExecutionError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first try
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            ..Self::default()
        }
    }

    /// Policy that never waits; for tests and one-shot tools.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before retry number `retry` (0-based), capped at `max_delay`.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let delay_ms = (self.initial_delay.as_millis() as f64) * self.backoff_multiplier.powi(retry as i32);
        let delay_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Run `operation`, retrying only transient failures.
    ///
    /// Returns the final outcome and the number of retries spent.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> (Result<T, ExecutionError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(value) => return (Ok(value), retries),
                Err(e) if e.is_transient() && retries < self.max_retries => {
                    let delay = self.delay_for_attempt(retries);
                    warn!(
                        "Transient execution failure, retry {} of {} in {:?}: {}",
                        retries + 1,
                        self.max_retries,
                        delay,
                        e.message
                    );
                    tokio::time::sleep(delay).await;
                    retries += 1;
                }
                Err(e) => return (Err(e), retries),
            }
        }
    }
}
