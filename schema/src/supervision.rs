//! Supervision and aggregation configuration
//!
//! These values are loaded once at startup and shared read-only by every
//! supervisor, breaker and the aggregator. All durations are stored as
//! milliseconds and exposed as [`Duration`] through accessor methods.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Process-wide supervision settings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SupervisionConfig {
    /// Restarts allowed within one restart window
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Sliding window over which exits are counted, in milliseconds
    #[serde(default = "default_restart_window_ms")]
    pub restart_window_ms: u64,

    /// Uptime after which a worker is considered recovered, in milliseconds
    #[serde(default = "default_min_uptime_ms")]
    pub min_uptime_ms: u64,

    /// Delay before the first restart in a window, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Multiplicative factor applied per restart attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound on the restart delay, in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Interval between health checks, in milliseconds
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    /// Time a worker has to answer a health check, in milliseconds
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,

    /// Time a worker has to exit after a shutdown request, in milliseconds
    #[serde(default = "default_graceful_timeout_ms")]
    pub graceful_timeout_ms: u64,

    /// Thresholds for every circuit breaker created under this config
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl SupervisionConfig {
    /// Restart window as a Duration
    pub fn restart_window(&self) -> Duration {
        Duration::from_millis(self.restart_window_ms)
    }

    /// Minimum uptime as a Duration
    pub fn min_uptime(&self) -> Duration {
        Duration::from_millis(self.min_uptime_ms)
    }

    /// Base restart delay as a Duration
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Maximum restart delay as a Duration
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Health check interval as a Duration
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Health check timeout as a Duration
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    /// Graceful shutdown timeout as a Duration
    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_timeout_ms)
    }
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            restart_window_ms: default_restart_window_ms(),
            min_uptime_ms: default_min_uptime_ms(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
            graceful_timeout_ms: default_graceful_timeout_ms(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

const fn default_max_restarts() -> u32 {
    10
}

const fn default_restart_window_ms() -> u64 {
    60_000
}

const fn default_min_uptime_ms() -> u64 {
    1_000
}

const fn default_base_delay_ms() -> u64 {
    1_000
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

const fn default_health_check_interval_ms() -> u64 {
    30_000
}

const fn default_health_check_timeout_ms() -> u64 {
    5_000
}

const fn default_graceful_timeout_ms() -> u64 {
    5_000
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip a closed breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close the breaker
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Time an open breaker waits before allowing a trial call, in milliseconds
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
}

impl CircuitBreakerConfig {
    /// Open timeout as a Duration
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            open_timeout_ms: default_open_timeout_ms(),
        }
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_success_threshold() -> u32 {
    2
}

const fn default_open_timeout_ms() -> u64 {
    60_000
}

/// Health aggregator settings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorConfig {
    /// Interval between polling rounds, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Bound on the scheduler round-trip used for liveness, in milliseconds
    #[serde(default = "default_liveness_bound_ms")]
    pub liveness_bound_ms: u64,

    /// Timeout applied to each dependency probe, in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Probe results retained per dependency
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Weights of the health score components
    #[serde(default)]
    pub weights: ScoreWeights,

    /// Score classification thresholds
    #[serde(default)]
    pub thresholds: ScoreThresholds,
}

impl AggregatorConfig {
    /// Poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Liveness bound as a Duration
    pub fn liveness_bound(&self) -> Duration {
        Duration::from_millis(self.liveness_bound_ms)
    }

    /// Probe timeout as a Duration
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            liveness_bound_ms: default_liveness_bound_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            history_capacity: default_history_capacity(),
            weights: ScoreWeights::default(),
            thresholds: ScoreThresholds::default(),
        }
    }
}

const fn default_poll_interval_ms() -> u64 {
    10_000
}

const fn default_liveness_bound_ms() -> u64 {
    1_000
}

const fn default_probe_timeout_ms() -> u64 {
    5_000
}

const fn default_history_capacity() -> usize {
    100
}

/// Relative weights of the health score components
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreWeights {
    /// Weight of the memory headroom component
    #[serde(default = "default_memory_weight")]
    pub memory: f64,
    /// Weight of the healthy-dependency fraction
    #[serde(default = "default_dependencies_weight")]
    pub dependencies: f64,
    /// Weight of the running-worker fraction
    #[serde(default = "default_workers_weight")]
    pub workers: f64,
}

impl ScoreWeights {
    /// Sum of all weights
    pub fn total(&self) -> f64 {
        self.memory + self.dependencies + self.workers
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            memory: default_memory_weight(),
            dependencies: default_dependencies_weight(),
            workers: default_workers_weight(),
        }
    }
}

const fn default_memory_weight() -> f64 {
    0.2
}

const fn default_dependencies_weight() -> f64 {
    0.4
}

const fn default_workers_weight() -> f64 {
    0.4
}

/// Score boundaries between healthy, degraded and unhealthy (0..=100)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreThresholds {
    /// Minimum score reported as healthy
    #[serde(default = "default_healthy_threshold")]
    pub healthy: f64,
    /// Minimum score reported as degraded
    #[serde(default = "default_degraded_threshold")]
    pub degraded: f64,
}

impl Default for ScoreThresholds {
    fn default() -> Self {
        Self {
            healthy: default_healthy_threshold(),
            degraded: default_degraded_threshold(),
        }
    }
}

const fn default_healthy_threshold() -> f64 {
    80.0
}

const fn default_degraded_threshold() -> f64 {
    50.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supervision_defaults_from_empty_json() {
        let config: SupervisionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SupervisionConfig::default());
        assert_eq!(config.restart_window(), Duration::from_secs(60));
        assert_eq!(config.circuit_breaker.open_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let config: SupervisionConfig = serde_json::from_str(
            r#"{"maxRestarts":2,"circuitBreaker":{"failureThreshold":3}}"#,
        )
        .unwrap();
        assert_eq!(config.max_restarts, 2);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.success_threshold, 2);
        assert_eq!(config.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_aggregator_defaults() {
        let config = AggregatorConfig::default();
        assert_eq!(config.history_capacity, 100);
        assert!((config.weights.total() - 1.0).abs() < f64::EPSILON);
        assert!(config.thresholds.healthy > config.thresholds.degraded);
    }
}
