pub mod circuit_breaker;
pub mod dead_letter;
pub mod degradation;
pub mod health;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use dead_letter::{DeadLetter, DeadLetterError, DeadLetterQueue};
pub use health::{DependencyProbe, HealthChecker, HealthStatus};
pub use retry::{RetryError, RetryPolicy};

use std::future::Future;
use std::sync::Arc;

use crate::config::DependencyPolicy;
use crate::gateway::GatewayError;

/// Retry policy and circuit breaker for one upstream dependency. Each
/// attempt goes through the breaker, so an open breaker ends the retry loop
/// immediately.
#[derive(Clone)]
pub struct Guarded {
    pub breaker: Arc<CircuitBreaker>,
    pub retry: RetryPolicy,
}

impl Guarded {
    pub fn new(name: &'static str, policy: &DependencyPolicy) -> Self {
        Self {
            breaker: Arc::new(CircuitBreaker::new(name, policy)),
            retry: RetryPolicy::from_policy(policy),
        }
    }

    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let breaker = &*self.breaker;
        self.retry
            .run(breaker.name(), || {
                // `op` only runs once the breaker admits the attempt.
                let admitted = breaker.try_acquire().map(|permit| (permit, op()));
                async move {
                    let (permit, attempt) = admitted?;
                    permit.record(attempt.await)
                }
            })
            .await
    }
}
