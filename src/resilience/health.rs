use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tracing::warn;

use super::circuit_breaker::{CircuitBreaker, CircuitState};
use super::dead_letter::DeadLetterQueue;
use crate::config::HealthConfig;
use crate::db::DatabaseManager;
use crate::green_api::WhatsAppGateway;

#[async_trait]
pub trait DependencyProbe: Send + Sync {
    fn name(&self) -> &'static str;
    /// A failing mandatory probe makes the service unready.
    fn mandatory(&self) -> bool;
    async fn check(&self) -> Result<(), String>;
}

pub struct DatabaseProbe {
    db: DatabaseManager,
}

impl DatabaseProbe {
    pub fn new(db: DatabaseManager) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DependencyProbe for DatabaseProbe {
    fn name(&self) -> &'static str {
        "database"
    }

    fn mandatory(&self) -> bool {
        true
    }

    async fn check(&self) -> Result<(), String> {
        self.db.ping().await.map_err(|e| e.to_string())
    }
}

/// Redis `PING` through the dead letter queue's client.
pub struct RedisProbe {
    queue: Arc<dyn DeadLetterQueue>,
}

impl RedisProbe {
    pub fn new(queue: Arc<dyn DeadLetterQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl DependencyProbe for RedisProbe {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn mandatory(&self) -> bool {
        true
    }

    async fn check(&self) -> Result<(), String> {
        self.queue.ping().await.map_err(|e| e.to_string())
    }
}

/// How many active hotels are scanned for a Green API instance to check.
const GREEN_API_SAMPLE: i64 = 50;

/// Asks Green API for the state of the first active hotel's instance. Optional:
/// an unauthorized instance degrades the service but inbound traffic still
/// lands in the database.
pub struct GreenApiProbe {
    gateway: Arc<dyn WhatsAppGateway>,
    db: DatabaseManager,
}

impl GreenApiProbe {
    pub fn new(gateway: Arc<dyn WhatsAppGateway>, db: DatabaseManager) -> Self {
        Self { gateway, db }
    }
}

#[async_trait]
impl DependencyProbe for GreenApiProbe {
    fn name(&self) -> &'static str {
        "green_api"
    }

    fn mandatory(&self) -> bool {
        false
    }

    async fn check(&self) -> Result<(), String> {
        let hotels = self
            .db
            .hotel_store()
            .list_hotels(true, GREEN_API_SAMPLE, 0)
            .await
            .map_err(|e| e.to_string())?;
        let Some(instance) = hotels.iter().find_map(|hotel| hotel.green_api_instance()) else {
            return Ok(());
        };
        let state = self
            .gateway
            .instance_state(&instance)
            .await
            .map_err(|e| e.to_string())?;
        if state == "authorized" {
            Ok(())
        } else {
            Err(format!("instance {} is {state}", instance.id))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub name: &'static str,
    pub healthy: bool,
    pub mandatory: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub status: HealthStatus,
    pub checks: Vec<ProbeResult>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerReport {
    pub name: &'static str,
    pub state: CircuitState,
    pub recent_failures: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterReport {
    pub backend: &'static str,
    pub depth: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetailedReport {
    pub status: HealthStatus,
    pub version: &'static str,
    pub checks: Vec<ProbeResult>,
    pub circuit_breakers: Vec<BreakerReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letters: Option<DeadLetterReport>,
    pub checked_at: DateTime<Utc>,
}

struct CachedChecks {
    at: Instant,
    wall_clock: DateTime<Utc>,
    results: Vec<ProbeResult>,
}

pub struct HealthChecker {
    probes: Vec<Arc<dyn DependencyProbe>>,
    breakers: Vec<Arc<CircuitBreaker>>,
    dead_letters: Option<Arc<dyn DeadLetterQueue>>,
    cache_ttl: Duration,
    probe_timeout: Duration,
    cache: Mutex<Option<CachedChecks>>,
}

impl HealthChecker {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            probes: Vec::new(),
            breakers: Vec::new(),
            dead_letters: None,
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            cache: Mutex::new(None),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn DependencyProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breakers.push(breaker);
        self
    }

    pub fn with_dead_letters(mut self, queue: Arc<dyn DeadLetterQueue>) -> Self {
        self.dead_letters = Some(queue);
        self
    }

    pub async fn readiness(&self) -> ReadinessReport {
        let (results, checked_at) = self.probe_all().await;
        let status = probe_status(&results);
        ReadinessReport {
            ready: status != HealthStatus::Unhealthy,
            status,
            checks: results,
            checked_at,
        }
    }

    pub async fn detailed(&self) -> DetailedReport {
        let (results, checked_at) = self.probe_all().await;
        let circuit_breakers: Vec<BreakerReport> = self
            .breakers
            .iter()
            .map(|breaker| BreakerReport {
                name: breaker.name(),
                state: breaker.state(),
                recent_failures: breaker.failure_count(),
            })
            .collect();

        let dead_letters = match &self.dead_letters {
            Some(queue) => Some(DeadLetterReport {
                backend: queue.backend(),
                depth: queue.len().await.ok(),
            }),
            None => None,
        };

        let mut status = probe_status(&results);
        if status == HealthStatus::Healthy
            && circuit_breakers
                .iter()
                .any(|b| b.state != CircuitState::Closed)
        {
            status = HealthStatus::Degraded;
        }

        DetailedReport {
            status,
            version: env!("CARGO_PKG_VERSION"),
            checks: results,
            circuit_breakers,
            dead_letters,
            checked_at,
        }
    }

    /// Probe results, reused while younger than the cache TTL. The lock is
    /// held across probing so concurrent callers share one round of checks.
    async fn probe_all(&self) -> (Vec<ProbeResult>, DateTime<Utc>) {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.at.elapsed() < self.cache_ttl {
                return (cached.results.clone(), cached.wall_clock);
            }
        }

        let results =
            futures::future::join_all(self.probes.iter().map(|probe| self.run_probe(probe))).await;
        let wall_clock = Utc::now();
        *cache = Some(CachedChecks {
            at: Instant::now(),
            wall_clock,
            results: results.clone(),
        });
        (results, wall_clock)
    }

    async fn run_probe(&self, probe: &Arc<dyn DependencyProbe>) -> ProbeResult {
        let started = Instant::now();
        let outcome = match timeout(self.probe_timeout, probe.check()).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "timed out after {}ms",
                self.probe_timeout.as_millis()
            )),
        };
        let latency_ms = started.elapsed().as_millis() as u64;
        if let Err(error) = &outcome {
            warn!(probe = probe.name(), %error, "Health probe failed");
        }
        ProbeResult {
            name: probe.name(),
            healthy: outcome.is_ok(),
            mandatory: probe.mandatory(),
            latency_ms,
            error: outcome.err(),
        }
    }
}

fn probe_status(results: &[ProbeResult]) -> HealthStatus {
    if results.iter().any(|r| r.mandatory && !r.healthy) {
        HealthStatus::Unhealthy
    } else if results.iter().any(|r| !r.healthy) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::testing::FakeProbe;
    use super::*;
    use crate::bot::dispatcher::testing::FakeGateway;
    use crate::db::testing::{seed_hotel, sqlite_manager};
    use crate::resilience::dead_letter::MemoryDeadLetterQueue;

    fn config() -> HealthConfig {
        HealthConfig {
            cache_ttl_secs: 5,
            probe_timeout_ms: 100,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_is_cached_for_ttl() {
        let db = Arc::new(FakeProbe::new("database", true, true));
        let checker = HealthChecker::new(&config()).with_probe(db.clone());

        assert!(checker.readiness().await.ready);
        db.set_healthy(false);
        assert!(checker.readiness().await.ready, "served from cache");
        assert_eq!(db.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        let report = checker.readiness().await;
        assert!(!report.ready);
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(db.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn optional_failures_only_degrade() {
        let checker = HealthChecker::new(&config())
            .with_probe(Arc::new(FakeProbe::new("database", true, true)))
            .with_probe(Arc::new(FakeProbe::new("green_api", false, false)));
        let report = checker.readiness().await;
        assert!(report.ready);
        assert_eq!(report.status, HealthStatus::Degraded);
    }

    struct HangingProbe;

    #[async_trait]
    impl DependencyProbe for HangingProbe {
        fn name(&self) -> &'static str {
            "redis"
        }

        fn mandatory(&self) -> bool {
            true
        }

        async fn check(&self) -> Result<(), String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probe_times_out() {
        let checker = HealthChecker::new(&config()).with_probe(Arc::new(HangingProbe));
        let report = checker.readiness().await;
        assert!(!report.ready);
        let error = report.checks[0].error.as_deref().expect("error");
        assert!(error.contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn detailed_reports_open_breakers_as_degraded() {
        let breaker = Arc::new(CircuitBreaker::with_settings(
            "deepseek",
            1,
            Duration::from_secs(60),
            Duration::from_secs(30),
        ));
        let _ = breaker
            .call(|| async { Err::<(), _>(crate::gateway::GatewayError::Timeout) })
            .await;

        let queue = Arc::new(MemoryDeadLetterQueue::new(10));
        let checker = HealthChecker::new(&config())
            .with_probe(Arc::new(FakeProbe::new("database", true, true)))
            .with_breaker(breaker)
            .with_dead_letters(queue);

        let report = checker.detailed().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.circuit_breakers[0].state, CircuitState::Open);
        let dlq = report.dead_letters.expect("dlq report");
        assert_eq!(dlq.backend, "memory");
        assert_eq!(dlq.depth, Some(0));
    }

    #[tokio::test]
    async fn unauthorized_green_api_instance_degrades() {
        let (db, _file) = sqlite_manager().await;
        seed_hotel(&db, "+100", "1101").await;

        let authorized = GreenApiProbe::new(Arc::new(FakeGateway::default()), db.clone());
        assert!(!authorized.mandatory());
        assert_eq!(authorized.check().await, Ok(()));

        let checker = HealthChecker::new(&config())
            .with_probe(Arc::new(FakeProbe::new("database", true, true)))
            .with_probe(Arc::new(GreenApiProbe::new(
                Arc::new(FakeGateway::with_state("notAuthorized")),
                db,
            )));
        let report = checker.readiness().await;
        assert!(report.ready);
        assert_eq!(report.status, HealthStatus::Degraded);
        let green_api = report
            .checks
            .iter()
            .find(|check| check.name == "green_api")
            .expect("green_api check");
        assert!(!green_api.healthy);
        assert_eq!(green_api.error.as_deref(), Some("instance 1101 is notAuthorized"));
    }

    #[tokio::test]
    async fn green_api_without_configured_hotels_is_healthy() {
        let (db, _file) = sqlite_manager().await;
        let gateway = Arc::new(FakeGateway::with_state("notAuthorized"));
        let check = GreenApiProbe::new(gateway, db);
        assert_eq!(check.check().await, Ok(()));
    }
}
