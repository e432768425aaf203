//! Bounded retry with exponential backoff for gateway calls.
//!
//! Only transport failures are retried. Every attempt runs under `call_timeout`,
//! and an expired timeout counts as a transport failure.

use paybridge_core::{AdapterResult, GatewayError};
use paybridge_store::app_config::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (default: 3)
    pub max_attempts: u32,
    /// Delay before the second attempt (default: 100ms)
    pub initial_delay: Duration,
    /// Upper bound on any single delay (default: 5s)
    pub max_delay: Duration,
    /// Growth factor between delays (default: 2.0)
    pub backoff_multiplier: f64,
    /// Extra random fraction added to each delay, 0.0 disables it (default: 0.1)
    pub jitter: f64,
    /// Upper bound on one adapter call (default: 10s)
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: 0.1,
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            call_timeout: Duration::from_millis(config.call_timeout_ms),
            ..Self::default()
        }
    }

    /// No waiting between attempts. Handy for tests and local sandboxes.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
            ..Self::default()
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// A zero-attempt policy still makes one call.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after the given zero-based attempt:
    /// `initial_delay * multiplier^attempt`, jittered, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(30) as i32;
        let base_ms = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);

        let jitter = self.jitter.clamp(0.0, 1.0);
        let delay_ms = if jitter > 0.0 && capped_ms > 0.0 {
            capped_ms * (1.0 + rand::thread_rng().gen_range(0.0..jitter))
        } else {
            capped_ms
        };

        Duration::from_millis(delay_ms.max(0.0) as u64).min(self.max_delay)
    }

    /// Run one adapter call under `call_timeout`.
    pub async fn call<T, Fut>(&self, call: Fut) -> AdapterResult<T>
    where
        Fut: Future<Output = AdapterResult<T>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::timeout(format!(
                "no gateway response within {}ms",
                self.call_timeout.as_millis()
            ))),
        }
    }

    /// Repeat `operation` while it fails transiently. Returns the final result and the
    /// number of attempts made.
    pub async fn retry_transient<T, F, Fut>(&self, mut operation: F) -> (AdapterResult<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AdapterResult<T>>,
    {
        let max_attempts = self.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self.call(operation()).await;

            match &result {
                Err(error) if error.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_for_attempt(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts,
                        error = %error,
                        "Transient gateway failure, will retry"
                    );
                    debug!(delay_ms = delay.as_millis() as u64, "Sleeping before retry");
                    tokio::time::sleep(delay).await;
                }
                _ => return (result, attempt),
            }
        }
    }
}
