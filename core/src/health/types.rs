//! Core types and traits for health checking

use async_trait::async_trait;
use schema::HealthCheckResult;
use std::time::Duration;
use tokio::time::Instant;

use super::HealthError;

/// Trait for health check implementations
///
/// This trait is implemented by specific probe types (TCP, scheduler lag,
/// closures) to provide a uniform interface for health checking. Probes take
/// `&self` and keep no mutable state between calls, so one probe may be
/// checked from several tasks at once.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Execute the health check
    ///
    /// Returns `Ok(())` if the check passes, or an error describing what went wrong.
    async fn check(&self) -> Result<(), HealthError>;
}

/// Run `probe` bounded by `timeout` and convert the outcome into a result
///
/// Probe errors are folded into an unhealthy result; exceeding `timeout`
/// yields `healthy=false, error="timeout"`.
pub async fn run_probe(probe: &dyn Probe, timeout: Duration) -> HealthCheckResult {
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, probe.check()).await;
    let latency_ms = elapsed_ms(started);
    match outcome {
        Ok(Ok(())) => HealthCheckResult::healthy(latency_ms),
        Ok(Err(e)) => HealthCheckResult::unhealthy(latency_ms, e.describe()),
        Err(_) => HealthCheckResult::timeout(latency_ms),
    }
}

pub(crate) fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::FnProbe;

    #[tokio::test]
    async fn test_run_probe_healthy() {
        let probe = FnProbe::new(|| async { Ok(()) });
        let result = run_probe(&probe, Duration::from_secs(1)).await;
        assert!(result.healthy);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_run_probe_failure_keeps_message() {
        let probe = FnProbe::new(|| async { Err(HealthError::Failed("refused".to_string())) });
        let result = run_probe(&probe, Duration::from_secs(1)).await;
        assert!(!result.healthy);
        assert_eq!(result.error.as_deref(), Some("refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_probe_timeout() {
        let probe = FnProbe::new(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        });
        let result = run_probe(&probe, Duration::from_millis(200)).await;
        assert!(!result.healthy);
        assert_eq!(result.error.as_deref(), Some("timeout"));
        assert!(result.latency_ms >= 200);
    }
}
