//! Retry policy for transient upstream failures
//!
//! Wraps `backoff`'s exponential schedule with an attempt budget. Only errors
//! classified by [`AppError::is_transient`] are retried; everything else is
//! returned after the first call.

use crate::config::IngestionConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use backoff::future::retry_notify;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff bounded by a total number of attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total calls, including the first one
    pub max_attempts: u32,
    /// Wait before the second call
    pub initial_delay: Duration,
    /// Growth factor between consecutive waits
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay,
            multiplier,
        }
    }

    pub fn from_config(config: &IngestionConfig) -> Self {
        Self::new(
            config.retry_max_attempts,
            Duration::from_millis(config.retry_initial_delay_ms),
            config.retry_multiplier,
        )
    }

    /// Delays between attempts, e.g. `[1s, 2s]` for the default policy
    pub fn delays(&self) -> Vec<Duration> {
        let mut delays = Vec::new();
        let mut next = self.initial_delay.as_secs_f64();
        for _ in 1..self.max_attempts.max(1) {
            delays.push(Duration::from_secs_f64(next));
            next *= self.multiplier;
        }
        delays
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_delay)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(0.0)
            .with_max_interval(Duration::from_secs(60))
            .with_max_elapsed_time(None)
            .build()
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent.
    ///
    /// The error of the last attempt is returned unchanged.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt: u32 = 0;

        retry_notify(
            self.schedule(),
            || {
                attempt += 1;
                let current = attempt;
                let call = op();
                async move {
                    call.await.map_err(|err| {
                        if err.is_transient() && current < max_attempts {
                            backoff::Error::transient(err)
                        } else {
                            backoff::Error::permanent(err)
                        }
                    })
                }
            },
            |err: AppError, wait: Duration| {
                metrics::record_retry(operation);
                warn!(
                    operation,
                    error = %err,
                    wait_ms = wait.as_millis() as u64,
                    "Transient failure, retrying"
                );
            },
        )
        .await
    }
}
