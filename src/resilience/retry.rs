use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DependencyPolicy;
use crate::gateway::GatewayError;
use crate::web::metrics::Metrics;

#[derive(Debug, Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct RetryError {
    pub error: GatewayError,
    pub attempts: u32,
}

/// Bounded exponential backoff for transient gateway failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: false,
        }
    }

    pub fn from_policy(policy: &DependencyPolicy) -> Self {
        Self::new(
            policy.max_attempts,
            Duration::from_millis(policy.base_delay_ms),
            Duration::from_millis(policy.max_delay_ms),
        )
        .with_jitter(policy.jitter)
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `min(base * 2^retry, max)` without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before retry number `retry`, never shorter than `previous`.
    pub fn delay_for(&self, retry: u32, previous: Duration) -> Duration {
        let ceiling = self.backoff(retry);
        let delay = if self.jitter {
            let ceiling_ms = ceiling.as_millis() as u64;
            let floor_ms = ceiling_ms / 2;
            Duration::from_millis(rand::rng().random_range(floor_ms..=ceiling_ms))
        } else {
            ceiling
        };
        delay.max(previous).min(self.max_delay)
    }

    /// Calls `op` until it succeeds, fails with a non-transient error, or
    /// `max_attempts` calls have been made.
    pub async fn run<T, F, Fut>(&self, dependency: &'static str, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempts = 0;
        let mut previous = Duration::ZERO;
        loop {
            attempts += 1;
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_transient() {
                debug!(dependency, attempts, %error, "Not retrying non-transient error");
                return Err(RetryError { error, attempts });
            }
            if attempts >= self.max_attempts {
                warn!(dependency, attempts, %error, "Retries exhausted");
                return Err(RetryError { error, attempts });
            }

            let delay = self.delay_for(attempts - 1, previous);
            previous = delay;
            Metrics::outbound_retry();
            warn!(
                dependency,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                %error,
                "Transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
