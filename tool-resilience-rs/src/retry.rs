//! # Retry Mechanism
//!
//! Exponential backoff for calls that already passed the circuit breaker's
//! admission check. Every attempt runs under a hard timeout so a hung
//! dependency counts as a failure instead of blocking the caller.

use std::future::Future;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Backoff and timeout settings for one protected call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first one
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each retry
    pub backoff_multiplier: f64,
    /// Upper bound for a single backoff sleep
    pub max_delay: Duration,
    /// Random spread applied to each delay, 0.0 disables jitter
    pub jitter: f64,
    /// Hard limit for each individual attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Returned when every attempt failed
#[derive(Debug)]
pub struct RetryExhausted {
    /// Number of attempts that were made
    pub attempts: u32,
    /// Error from the final attempt
    pub last_error: anyhow::Error,
}

impl RetryPolicy {
    /// Total number of attempts this policy allows
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff to sleep after the given failed attempt (0-based)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(retry as i32);
        let base = self.initial_delay.as_secs_f64() * factor;
        let spread = self.jitter.clamp(0.0, 1.0);

        let secs = if spread > 0.0 {
            let scale = rand::thread_rng().gen_range((1.0 - spread)..=(1.0 + spread));
            base * scale
        } else {
            base
        };

        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()).max(0.0))
    }

    /// Runs the operation until it succeeds or the attempts are used up
    pub async fn run<T, E, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, RetryExhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        let started = Instant::now();
        let max_attempts = self.max_attempts();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let error = match timeout(self.attempt_timeout, operation()).await {
                Ok(Ok(value)) => {
                    histogram!(
                        "resilience.retry.duration_ms",
                        started.elapsed().as_millis() as f64,
                        "operation" => operation_name.to_string()
                    );
                    if attempt > 1 {
                        debug!(operation = %operation_name, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(err)) => err.into(),
                Err(_) => anyhow::anyhow!(
                    "timeout after {}ms",
                    self.attempt_timeout.as_millis()
                ),
            };

            counter!("resilience.retry.failed_attempts", 1, "operation" => operation_name.to_string());

            if attempt >= max_attempts {
                warn!(
                    operation = %operation_name,
                    attempts = attempt,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(RetryExhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }

            let backoff = self.delay_for_retry(attempt - 1);
            debug!(
                operation = %operation_name,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %error,
                "Retrying after error"
            );
            sleep(backoff).await;
        }
    }
}
