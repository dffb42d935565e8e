//! Health check, circuit breaker and report types
//!
//! [`HealthReport`] is the document served by the external reporting layer:
//!
//! - `GET /health` → the full report, 200 unless the status is unhealthy
//! - `GET /ready`  → readiness verdict, 200/503
//! - `GET /live`   → liveness verdict, 200/503

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::worker::WorkerStats;

/// HTTP status used when a verdict is positive
pub const HTTP_OK: u16 = 200;
/// HTTP status used when a verdict is negative
pub const HTTP_SERVICE_UNAVAILABLE: u16 = 503;

/// Outcome of a single probe invocation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    /// Whether the probe passed
    pub healthy: bool,
    /// Wall time the probe took, in milliseconds
    pub latency_ms: u64,
    /// Failure description (`"timeout"` for timeouts)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the probe completed (RFC3339)
    pub timestamp: String,
}

impl HealthCheckResult {
    /// A passing result
    pub fn healthy(latency_ms: u64) -> Self {
        Self {
            healthy: true,
            latency_ms,
            error: None,
            timestamp: crate::current_timestamp(),
        }
    }

    /// A failing result with the given error description
    pub fn unhealthy(latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency_ms,
            error: Some(error.into()),
            timestamp: crate::current_timestamp(),
        }
    }

    /// A failing result caused by the probe exceeding its timeout
    pub fn timeout(latency_ms: u64) -> Self {
        Self::unhealthy(latency_ms, "timeout")
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected until the open timeout elapses
    Open,
    /// Trial calls are allowed to test recovery
    HalfOpen,
}

/// One recorded breaker transition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    /// Breaker name
    pub breaker: String,
    /// State before the transition
    pub from: CircuitState,
    /// State after the transition
    pub to: CircuitState,
    /// When the transition happened (RFC3339)
    pub timestamp: String,
}

/// Report for one breaker-guarded dependency
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DependencyReport {
    /// Dependency name
    pub name: String,
    /// Current breaker state
    pub state: CircuitState,
    /// Whether the dependency counts as healthy for readiness
    pub healthy: bool,
    /// Percentage of healthy results in the rolling history
    pub uptime_percent: f64,
    /// Consecutive failures counted by the breaker
    pub failure_count: u32,
    /// Consecutive half-open successes counted by the breaker
    pub success_count: u32,
    /// Most recent probe result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<HealthCheckResult>,
}

/// Overall classification of the health score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum HealthLevel {
    /// Score at or above the healthy threshold
    Healthy,
    /// Score between the degraded and healthy thresholds
    Degraded,
    /// Score below the degraded threshold
    Unhealthy,
}

/// Aggregated health document
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Weighted score in 0..=100
    pub score: f64,
    /// Classification of `score`
    pub status: HealthLevel,
    /// Whether this instance should receive traffic
    pub ready: bool,
    /// Whether the host scheduler is responsive
    pub live: bool,
    /// Fraction of memory in use, 0..=1
    pub memory_pressure: f64,
    /// Per-dependency detail
    pub dependencies: Vec<DependencyReport>,
    /// Per-worker detail, keyed by worker id
    pub workers: BTreeMap<String, WorkerStats>,
    /// When the report was computed (RFC3339)
    pub timestamp: String,
}

impl HealthReport {
    /// Status code for `GET /health`
    pub fn health_http_status(&self) -> u16 {
        if self.status == HealthLevel::Unhealthy {
            HTTP_SERVICE_UNAVAILABLE
        } else {
            HTTP_OK
        }
    }

    /// Status code for `GET /ready`
    pub fn ready_http_status(&self) -> u16 {
        verdict_status(self.ready)
    }

    /// Status code for `GET /live`
    pub fn live_http_status(&self) -> u16 {
        verdict_status(self.live)
    }
}

fn verdict_status(ok: bool) -> u16 {
    if ok {
        HTTP_OK
    } else {
        HTTP_SERVICE_UNAVAILABLE
    }
}
