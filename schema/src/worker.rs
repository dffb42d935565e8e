//! Worker specification and lifecycle state types
//!
//! A worker is a child process kept alive by a supervisor. Workers progress
//! through the following states:
//!
//! - `Stopped`: no process, no pending restart
//! - `Starting`: process spawned (or restart pending), not yet confirmed healthy
//! - `Running`: process answered a health check or announced itself ready
//! - `Stopping`: an operator stop is in progress
//! - `Failed`: the restart budget is exhausted; requires external intervention

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::health::{DependencyReport, HealthCheckResult};

/// Specification for a supervised worker process
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSpec {
    /// Unique identifier for this worker
    pub id: String,

    /// Command to execute
    pub command: String,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables to set for the process
    #[serde(default)]
    pub environment: HashMap<String, String>,

    /// Working directory for the process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,

    /// External dependencies this worker relies on, each guarded by its own breaker
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
}

impl WorkerSpec {
    /// Create a spec with only an id and a command
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args: Vec::new(),
            environment: HashMap::new(),
            working_directory: None,
            dependencies: Vec::new(),
        }
    }
}

/// An external dependency that is probed for health
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DependencySpec {
    /// Dependency name, unique within its owner
    pub name: String,

    /// How the dependency is probed
    pub probe: ProbeSpec,
}

/// Probe configuration for a dependency
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProbeSpec {
    /// TCP connect to `host:port`
    Tcp {
        /// Host to connect to
        host: String,
        /// Port to connect to
        port: u16,
    },
    /// HTTP GET against `url`
    Http {
        /// Plain `http://` URL to request
        url: String,
        /// What counts as a healthy response
        #[serde(default)]
        expect: HttpExpect,
    },
    /// Local scheduler round-trip check
    SchedulerLag,
}

/// Expectation for an HTTP probe response
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum HttpExpect {
    /// Any 2xx status
    #[default]
    Any2xx,
    /// Exactly this status
    Status(u16),
    /// A 2xx status whose body contains this text
    BodyContains(String),
}

impl HttpExpect {
    pub fn matches_status(&self, status: u16) -> bool {
        match self {
            HttpExpect::Status(expected) => status == *expected,
            HttpExpect::Any2xx | HttpExpect::BodyContains(_) => (200..=299).contains(&status),
        }
    }

    pub fn matches_body(&self, body: &str) -> bool {
        match self {
            HttpExpect::BodyContains(expected) => body.contains(expected.as_str()),
            HttpExpect::Any2xx | HttpExpect::Status(_) => true,
        }
    }

    /// Whether the body has to be read at all
    pub fn needs_body(&self) -> bool {
        matches!(self, HttpExpect::BodyContains(_))
    }
}

/// Lifecycle state of a supervised worker
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum WorkerState {
    /// No process and no pending restart
    Stopped,
    /// Process spawned or restart pending, not yet confirmed healthy
    Starting,
    /// Process is up and confirmed healthy
    Running,
    /// Operator-requested stop in progress
    Stopping,
    /// Restart budget exhausted
    Failed,
}

impl WorkerState {
    /// Whether `start()` is accepted from this state
    pub fn can_start(&self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Failed)
    }

    /// Whether the state is terminal (no automatic transitions out of it)
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Failed)
    }

    /// Whether the worker counts as healthy for fleet scoring
    pub fn is_running(&self) -> bool {
        matches!(self, WorkerState::Running)
    }
}

/// Information about how a worker process exited
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerExit {
    /// Process ID that exited
    pub pid: u32,

    /// Exit code (None if killed by signal)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Signal that killed the process (Unix only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,

    /// Timestamp when the exit was detected
    pub timestamp: String,
}

impl WorkerExit {
    /// Check if this represents a clean exit (code 0)
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Point-in-time statistics for one worker
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    /// Worker identifier
    pub id: String,
    /// Current lifecycle state
    pub state: WorkerState,
    /// PID of the current process, if one is running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// When the current process was started (RFC3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// Milliseconds the current process has been up
    pub uptime_ms: u64,
    /// Automatic restarts granted over the supervisor's lifetime
    pub total_restarts: u32,
    /// Exits recorded in the current restart window
    pub restarts_in_window: u32,
    /// Exit code of the previous process
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_exit_code: Option<i32>,
    /// Signal that terminated the previous process
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_exit_signal: Option<i32>,
    /// Health checks failed in a row
    pub consecutive_health_failures: u32,
    /// Most recent health check against the process
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<HealthCheckResult>,
    /// Dependencies owned by this worker's supervisor
    #[serde(default)]
    pub dependencies: Vec<DependencyReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_state_predicates() {
        assert!(WorkerState::Stopped.can_start());
        assert!(WorkerState::Failed.can_start());
        assert!(!WorkerState::Running.can_start());
        assert!(!WorkerState::Starting.can_start());

        assert!(WorkerState::Failed.is_terminal());
        assert!(!WorkerState::Stopped.is_terminal());
        assert!(WorkerState::Running.is_running());
        assert!(!WorkerState::Starting.is_running());
    }

    #[test]
    fn test_worker_spec_defaults_from_json() {
        let spec: WorkerSpec =
            serde_json::from_str(r#"{"id":"api","command":"node"}"#).unwrap();
        assert_eq!(spec, WorkerSpec::new("api", "node"));
    }

    #[test]
    fn test_probe_spec_tagging() {
        let dep: DependencySpec = serde_json::from_str(
            r#"{"name":"db","probe":{"type":"tcp","host":"127.0.0.1","port":5432}}"#,
        )
        .unwrap();
        assert_eq!(
            dep.probe,
            ProbeSpec::Tcp {
                host: "127.0.0.1".to_string(),
                port: 5432
            }
        );

        let lag: ProbeSpec = serde_json::from_str(r#"{"type":"schedulerLag"}"#).unwrap();
        assert_eq!(lag, ProbeSpec::SchedulerLag);

        let http: ProbeSpec =
            serde_json::from_str(r#"{"type":"http","url":"http://127.0.0.1:8080/health"}"#)
                .unwrap();
        assert_eq!(
            http,
            ProbeSpec::Http {
                url: "http://127.0.0.1:8080/health".to_string(),
                expect: HttpExpect::Any2xx,
            }
        );
        let body: ProbeSpec = serde_json::from_str(
            r#"{"type":"http","url":"http://db/ping","expect":{"bodyContains":"pong"}}"#,
        )
        .unwrap();
        assert!(matches!(
            body,
            ProbeSpec::Http { expect: HttpExpect::BodyContains(text), .. } if text == "pong"
        ));
    }

    #[test]
    fn test_http_expect_matching() {
        assert!(HttpExpect::Any2xx.matches_status(204));
        assert!(!HttpExpect::Any2xx.matches_status(301));
        assert!(HttpExpect::Status(503).matches_status(503));
        assert!(!HttpExpect::Status(200).matches_status(201));

        let body = HttpExpect::BodyContains("healthy".to_string());
        assert!(body.matches_status(200));
        assert!(!body.matches_status(500));
        assert!(body.matches_body("service is healthy"));
        assert!(!body.matches_body("degraded"));
        assert!(body.needs_body());
        assert!(HttpExpect::Status(200).matches_body("anything"));
    }

    #[test]
    fn test_exit_success() {
        let exit = WorkerExit {
            pid: 10,
            exit_code: Some(0),
            signal: None,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
        };
        assert!(exit.is_success());

        let killed = WorkerExit {
            exit_code: None,
            signal: Some(9),
            ..exit
        };
        assert!(!killed.is_success());
    }
}
