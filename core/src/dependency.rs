//! Breaker-guarded external dependencies
//!
//! A [`Dependency`] pairs a [`Probe`] with its own [`CircuitBreaker`] and a
//! rolling history of results used for uptime reporting.

use schema::{CircuitBreakerConfig, CircuitState, DependencyReport, DependencySpec, HealthCheckResult};
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::{BreakerError, CircuitBreaker};
use crate::health::{create_probe, run_probe, Probe};
use crate::history::BoundedHistory;

/// Error recorded when the breaker refuses to run the probe
pub const CIRCUIT_OPEN_ERROR: &str = "circuit open";

/// A named dependency probed through a circuit breaker
pub struct Dependency {
    name: String,
    probe: Arc<dyn Probe>,
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
    history: parking_lot::Mutex<BoundedHistory<HealthCheckResult>>,
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependency")
            .field("name", &self.name)
            .field("state", &self.breaker.state())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Dependency {
    pub fn new(
        name: impl Into<String>,
        probe: Arc<dyn Probe>,
        breaker_config: CircuitBreakerConfig,
        timeout: Duration,
        history_capacity: usize,
    ) -> Self {
        let name = name.into();
        Self {
            breaker: Arc::new(CircuitBreaker::new(name.clone(), breaker_config)),
            name,
            probe,
            timeout,
            history: parking_lot::Mutex::new(BoundedHistory::new(history_capacity)),
        }
    }

    /// Build a dependency from its configured probe
    pub fn from_spec(
        spec: &DependencySpec,
        breaker_config: CircuitBreakerConfig,
        timeout: Duration,
        history_capacity: usize,
    ) -> Self {
        Self::new(
            spec.name.clone(),
            create_probe(&spec.probe, timeout),
            breaker_config,
            timeout,
            history_capacity,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Probe the dependency through its breaker and record the result
    ///
    /// Never fails: a rejected call is recorded as an unhealthy result with
    /// error `"circuit open"`.
    pub async fn check(&self) -> HealthCheckResult {
        let probe = Arc::clone(&self.probe);
        let timeout = self.timeout;
        let outcome = self
            .breaker
            .execute(|| async move {
                let result = run_probe(probe.as_ref(), timeout).await;
                if result.healthy {
                    Ok(result)
                } else {
                    Err(result)
                }
            })
            .await;

        let result = match outcome {
            Ok(result) | Err(BreakerError::Inner(result)) => result,
            Err(BreakerError::Open(_)) => HealthCheckResult::unhealthy(0, CIRCUIT_OPEN_ERROR),
        };
        self.history.lock().push(result.clone());
        result
    }

    /// Healthy results as a percentage of recorded results, 100 when none
    pub fn uptime_percent(&self) -> f64 {
        let history = self.history.lock();
        if history.is_empty() {
            return 100.0;
        }
        let healthy = history.iter().filter(|r| r.healthy).count();
        healthy as f64 / history.len() as f64 * 100.0
    }

    pub fn last_check(&self) -> Option<HealthCheckResult> {
        self.history.lock().latest().cloned()
    }

    /// Closed, or half-open with the latest probe healthy
    pub fn is_ready(&self) -> bool {
        match self.breaker.state() {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => self.last_check().is_some_and(|r| r.healthy),
            CircuitState::Open => false,
        }
    }

    pub fn report(&self) -> DependencyReport {
        let snapshot = self.breaker.snapshot();
        DependencyReport {
            name: self.name.clone(),
            state: snapshot.state,
            healthy: self.is_ready(),
            uptime_percent: self.uptime_percent(),
            failure_count: snapshot.failure_count,
            success_count: snapshot.success_count,
            last_check: self.last_check(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{FnProbe, HealthError};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn breaker_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            open_timeout_ms: 100,
        }
    }

    fn switchable(up: Arc<AtomicBool>) -> Arc<dyn Probe> {
        Arc::new(FnProbe::new(move || {
            let up = up.load(Ordering::SeqCst);
            async move {
                if up {
                    Ok(())
                } else {
                    Err(HealthError::Failed("connection refused".to_string()))
                }
            }
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_dependency_opens_and_records_rejections() {
        let up = Arc::new(AtomicBool::new(false));
        let dep = Dependency::new(
            "db",
            switchable(Arc::clone(&up)),
            breaker_config(),
            Duration::from_secs(1),
            10,
        );

        assert!(dep.is_ready());
        assert_eq!(dep.uptime_percent(), 100.0);

        dep.check().await;
        dep.check().await;
        assert_eq!(dep.breaker().state(), CircuitState::Open);
        assert!(!dep.is_ready());

        let rejected = dep.check().await;
        assert_eq!(rejected.error.as_deref(), Some(CIRCUIT_OPEN_ERROR));
        assert_eq!(dep.uptime_percent(), 0.0);

        up.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(dep.check().await.healthy);
        assert_eq!(dep.breaker().state(), CircuitState::Closed);
        assert_eq!(dep.uptime_percent(), 25.0);

        let report = dep.report();
        assert_eq!(report.name, "db");
        assert!(report.healthy);
        assert!(report.last_check.unwrap().healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_readiness_follows_last_probe() {
        let up = Arc::new(AtomicBool::new(false));
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            open_timeout_ms: 100,
        };
        let dep = Dependency::new(
            "queue",
            switchable(Arc::clone(&up)),
            config,
            Duration::from_secs(1),
            10,
        );

        dep.check().await;
        up.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_millis(150)).await;
        dep.check().await;

        assert_eq!(dep.breaker().state(), CircuitState::HalfOpen);
        assert!(dep.is_ready());
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let dep = Dependency::new(
            "cache",
            switchable(Arc::new(AtomicBool::new(true))),
            breaker_config(),
            Duration::from_secs(1),
            3,
        );
        for _ in 0..5 {
            dep.check().await;
        }
        assert_eq!(dep.history.lock().len(), 3);
    }
}
