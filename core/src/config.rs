//! Configuration loading and validation
//!
//! A supervisor file is TOML with four optional sections:
//!
//! ```toml
//! [supervision]
//! maxRestarts = 3
//!
//! [aggregator]
//! pollIntervalMs = 5000
//!
//! [[workers]]
//! id = "api"
//! command = "node"
//! args = ["server.js"]
//!
//! [[dependencies]]
//! name = "db"
//! probe = { type = "tcp", host = "127.0.0.1", port = 5432 }
//! ```
//!
//! Omitted fields take the serde defaults of the schema types. Validation
//! reports the first problem found, prefixed with its field path.

use crate::{CoreError, Result};
use schema::*;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Top-level TOML structure of a supervisor configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorFile {
    #[serde(default)]
    pub supervision: SupervisionConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    /// Workers to supervise
    #[serde(default)]
    pub workers: Vec<WorkerSpec>,
    /// Dependencies polled by the health aggregator
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
}

impl SupervisorFile {
    /// Validate the configuration and return `Result<()>` with field-path errors
    pub fn validate(&self) -> Result<()> {
        validate_supervision(&self.supervision)?;
        validate_aggregator(&self.aggregator)?;

        let mut seen = HashSet::new();
        for (i, worker) in self.workers.iter().enumerate() {
            if worker.id.trim().is_empty() {
                return Err(invalid(format!("workers[{i}].id: cannot be empty")));
            }
            if !seen.insert(worker.id.as_str()) {
                return Err(invalid(format!(
                    "workers[{i}].id: duplicate id '{}'",
                    worker.id
                )));
            }
            if worker.command.trim().is_empty() {
                return Err(invalid(format!("workers[{i}].command: cannot be empty")));
            }
            if worker.environment.keys().any(|k| k.trim().is_empty()) {
                return Err(invalid(format!(
                    "workers[{i}].environment: keys cannot be empty"
                )));
            }
            validate_dependencies(&format!("workers[{i}].dependencies"), &worker.dependencies)?;
        }

        validate_dependencies("dependencies", &self.dependencies)
    }
}

fn invalid(message: String) -> CoreError {
    CoreError::ValidationError(message)
}

fn validate_supervision(config: &SupervisionConfig) -> Result<()> {
    let positive = [
        ("restartWindowMs", config.restart_window_ms),
        ("healthCheckIntervalMs", config.health_check_interval_ms),
        ("healthCheckTimeoutMs", config.health_check_timeout_ms),
        ("gracefulTimeoutMs", config.graceful_timeout_ms),
    ];
    for (field, value) in positive {
        if value == 0 {
            return Err(invalid(format!("supervision.{field}: must be > 0")));
        }
    }
    if !(config.backoff_multiplier.is_finite() && config.backoff_multiplier >= 1.0) {
        return Err(invalid(
            "supervision.backoffMultiplier: must be >= 1.0".to_string(),
        ));
    }
    if config.max_backoff_ms < config.base_delay_ms {
        return Err(invalid(
            "supervision.maxBackoffMs: must be >= baseDelayMs".to_string(),
        ));
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        return Err(invalid(
            "supervision.circuitBreaker.failureThreshold: must be > 0".to_string(),
        ));
    }
    if breaker.success_threshold == 0 {
        return Err(invalid(
            "supervision.circuitBreaker.successThreshold: must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_aggregator(config: &AggregatorConfig) -> Result<()> {
    let positive = [
        ("pollIntervalMs", config.poll_interval_ms),
        ("livenessBoundMs", config.liveness_bound_ms),
        ("probeTimeoutMs", config.probe_timeout_ms),
    ];
    for (field, value) in positive {
        if value == 0 {
            return Err(invalid(format!("aggregator.{field}: must be > 0")));
        }
    }
    if config.history_capacity == 0 {
        return Err(invalid(
            "aggregator.historyCapacity: must be > 0".to_string(),
        ));
    }

    let weights = &config.weights;
    for (field, value) in [
        ("memory", weights.memory),
        ("dependencies", weights.dependencies),
        ("workers", weights.workers),
    ] {
        if !(value.is_finite() && value >= 0.0) {
            return Err(invalid(format!(
                "aggregator.weights.{field}: must be a non-negative number"
            )));
        }
    }
    if weights.total() <= 0.0 {
        return Err(invalid(
            "aggregator.weights: at least one weight must be > 0".to_string(),
        ));
    }

    let thresholds = &config.thresholds;
    if !(0.0..=100.0).contains(&thresholds.healthy) {
        return Err(invalid(
            "aggregator.thresholds.healthy: must be between 0 and 100".to_string(),
        ));
    }
    if !(0.0..=thresholds.healthy).contains(&thresholds.degraded) {
        return Err(invalid(
            "aggregator.thresholds.degraded: must be between 0 and thresholds.healthy".to_string(),
        ));
    }
    Ok(())
}

fn validate_dependencies(path: &str, dependencies: &[DependencySpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for (i, dep) in dependencies.iter().enumerate() {
        if dep.name.trim().is_empty() {
            return Err(invalid(format!("{path}[{i}].name: cannot be empty")));
        }
        if !seen.insert(dep.name.as_str()) {
            return Err(invalid(format!(
                "{path}[{i}].name: duplicate name '{}'",
                dep.name
            )));
        }
        match &dep.probe {
            ProbeSpec::Tcp { host, port } => {
                if host.trim().is_empty() {
                    return Err(invalid(format!(
                        "{path}[{i}].probe[Tcp].host: cannot be empty"
                    )));
                }
                if *port == 0 {
                    return Err(invalid(format!(
                        "{path}[{i}].probe[Tcp].port: must be 1..=65535"
                    )));
                }
            }
            ProbeSpec::Http { url, .. } => match url.parse::<hyper::Uri>() {
                Ok(uri) if uri.scheme_str() == Some("http") && uri.host().is_some() => {}
                _ => {
                    return Err(invalid(format!(
                        "{path}[{i}].probe[Http].url: '{url}' is not an http:// URL"
                    )));
                }
            },
            ProbeSpec::SchedulerLag => {}
        }
    }
    Ok(())
}

/// Load a supervisor configuration from a TOML file path
pub fn load_from_toml_path(path: impl AsRef<Path>) -> Result<SupervisorFile> {
    let data = fs::read_to_string(&path).map_err(|e| {
        CoreError::ConfigurationError(format!("Failed to read config {:?}: {}", path.as_ref(), e))
    })?;
    load_from_toml_str(&data)
}

/// Load a supervisor configuration from a TOML string
pub fn load_from_toml_str(input: &str) -> Result<SupervisorFile> {
    let cfg: SupervisorFile = toml::from_str(input)
        .map_err(|e| CoreError::ConfigurationError(format!("TOML parse error: {}", e)))?;
    cfg.validate()?;
    Ok(cfg)
}
