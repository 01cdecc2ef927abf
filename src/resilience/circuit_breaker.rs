use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::DependencyPolicy;
use crate::gateway::GatewayError;
use crate::web::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Rolling-window circuit breaker guarding one upstream dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    failure_threshold: usize,
    window: Duration,
    open_duration: Duration,
    inner: Mutex<BreakerInner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    /// The dependency answered, but with an error that says nothing about its health.
    Neutral,
}

/// Admission ticket returned by [`CircuitBreaker::try_acquire`]. Dropping it
/// without reporting an outcome releases a half-open trial slot.
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.settle(self.trial, Outcome::Success);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.settle(self.trial, Outcome::Failure);
    }

    fn neutral(mut self) {
        self.settled = true;
        self.breaker.settle(self.trial, Outcome::Neutral);
    }

    /// Settles the permit from a call result. Only transient errors count
    /// as failures.
    pub fn record<T>(self, result: Result<T, GatewayError>) -> Result<T, GatewayError> {
        match &result {
            Ok(_) => self.success(),
            Err(err) if err.is_transient() => self.failure(),
            Err(_) => self.neutral(),
        }
        result
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.inner.lock().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: &'static str, policy: &DependencyPolicy) -> Self {
        Self::with_settings(
            name,
            policy.failure_threshold,
            Duration::from_secs(policy.failure_window_secs),
            Duration::from_secs(policy.open_duration_secs),
        )
    }

    pub fn with_settings(
        name: &'static str,
        failure_threshold: u32,
        window: Duration,
        open_duration: Duration,
    ) -> Self {
        Self {
            name,
            failure_threshold: failure_threshold.max(1) as usize,
            window,
            open_duration,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    /// Failures currently inside the rolling window.
    pub fn failure_count(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.prune(&mut inner, now);
        inner.failures.len()
    }

    pub fn try_acquire(&self) -> Result<Permit<'_>, GatewayError> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        match inner.state {
            CircuitState::Closed => Ok(Permit {
                breaker: self,
                trial: false,
                settled: false,
            }),
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Ok(Permit {
                    breaker: self,
                    trial: true,
                    settled: false,
                })
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                Metrics::breaker_rejection();
                Err(GatewayError::CircuitOpen(self.name))
            }
        }
    }

    /// Runs `op` under the breaker.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let permit = self.try_acquire()?;
        permit.record(op().await)
    }

    fn settle(&self, trial: bool, outcome: Outcome) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        if trial {
            inner.trial_in_flight = false;
        }

        match (inner.state, outcome) {
            (CircuitState::HalfOpen, Outcome::Success | Outcome::Neutral) if trial => {
                inner.failures.clear();
                inner.opened_at = None;
                self.transition(&mut inner, CircuitState::Closed);
            }
            (CircuitState::HalfOpen, Outcome::Failure) if trial => {
                self.open(&mut inner, now);
            }
            (CircuitState::Closed, Outcome::Success) => {
                inner.failures.clear();
            }
            (CircuitState::Closed, Outcome::Failure) => {
                inner.failures.push_back(now);
                self.prune(&mut inner, now);
                if inner.failures.len() >= self.failure_threshold {
                    self.open(&mut inner, now);
                }
            }
            // Late results from calls admitted before the breaker tripped.
            _ => {}
        }
    }

    fn open(&self, inner: &mut BreakerInner, now: Instant) {
        inner.opened_at = Some(now);
        inner.failures.clear();
        self.transition(inner, CircuitState::Open);
    }

    fn refresh(&self, inner: &mut BreakerInner, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        let cooled = inner
            .opened_at
            .map(|opened| now.duration_since(opened) >= self.open_duration)
            .unwrap_or(true);
        if cooled {
            inner.trial_in_flight = false;
            self.transition(inner, CircuitState::HalfOpen);
        }
    }

    fn prune(&self, inner: &mut BreakerInner, now: Instant) {
        while let Some(first) = inner.failures.front() {
            if now.duration_since(*first) > self.window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&self, inner: &mut BreakerInner, next: CircuitState) {
        let previous = inner.state;
        if previous == next {
            return;
        }
        inner.state = next;
        Metrics::breaker_transition();
        match next {
            CircuitState::Open => warn!(
                dependency = self.name,
                from = ?previous,
                cooldown_secs = self.open_duration.as_secs(),
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => info!(
                dependency = self.name,
                "Circuit breaker half-open, admitting one trial call"
            ),
            CircuitState::Closed => info!(dependency = self.name, "Circuit breaker closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{CircuitBreaker, CircuitState};
    use crate::gateway::GatewayError;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::with_settings(
            "green_api",
            3,
            Duration::from_secs(60),
            Duration::from_secs(30),
        )
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), GatewayError> {
        breaker
            .call(|| async { Err::<(), _>(GatewayError::Timeout) })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_rejects_until_cooldown() {
        let breaker = breaker();
        for _ in 0..3 {
            assert!(matches!(fail(&breaker).await, Err(GatewayError::Timeout)));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let mut invoked = false;
        let rejected = breaker
            .call(|| {
                invoked = true;
                async { Ok::<_, GatewayError>(()) }
            })
            .await;
        assert!(matches!(rejected, Err(GatewayError::CircuitOpen("green_api"))));
        assert!(!invoked);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_exactly_one_trial() {
        let breaker = breaker();
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        let trial = breaker.try_acquire().expect("trial admitted");
        assert!(matches!(
            breaker.try_acquire(),
            Err(GatewayError::CircuitOpen(_))
        ));
        trial.success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens() {
        let breaker = breaker();
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        // Cooldown restarts from the failed trial.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_trial_frees_the_slot() {
        let breaker = breaker();
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        drop(breaker.try_acquire().expect("trial"));
        assert!(breaker.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_outside_window_expire() {
        let breaker = breaker();
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        tokio::time::advance(Duration::from_secs(61)).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 1);
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_counted() {
        let breaker = breaker();
        for _ in 0..5 {
            let result = breaker
                .call(|| async {
                    Err::<(), _>(GatewayError::Status {
                        status: 400,
                        body: "bad chat id".into(),
                    })
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn success_clears_failure_history() {
        let breaker = breaker();
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        breaker
            .call(|| async { Ok::<_, GatewayError>(()) })
            .await
            .expect("success");
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
