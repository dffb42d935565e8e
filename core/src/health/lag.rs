//! Local probe for host scheduler responsiveness

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

use super::{HealthError, Probe};

/// Spawn a no-op task and wait for it, returning the round-trip time
pub async fn scheduler_round_trip() -> Result<Duration, HealthError> {
    let started = Instant::now();
    tokio::spawn(async {})
        .await
        .map_err(|e| HealthError::Failed(format!("no-op task failed: {e}")))?;
    Ok(started.elapsed())
}

/// Probe that fails when a no-op task round-trip exceeds `max_lag`
#[derive(Debug, Clone)]
pub struct SchedulerLagProbe {
    max_lag: Duration,
}

impl SchedulerLagProbe {
    pub fn new(max_lag: Duration) -> Self {
        Self { max_lag }
    }
}

#[async_trait]
impl Probe for SchedulerLagProbe {
    async fn check(&self) -> Result<(), HealthError> {
        let lag = scheduler_round_trip().await?;
        if lag > self.max_lag {
            return Err(HealthError::SchedulerLag {
                lag,
                bound: self.max_lag,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_idle_runtime_passes() {
        let probe = SchedulerLagProbe::new(Duration::from_secs(1));
        assert!(probe.check().await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_bound_reports_lag() {
        // Any measurable round trip exceeds a zero bound, unless the clock did not move
        let probe = SchedulerLagProbe::new(Duration::ZERO);
        match probe.check().await {
            Ok(()) | Err(HealthError::SchedulerLag { .. }) => {}
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
}
