//! Event system for the warden supervisor
//!
//! Events are emitted by worker supervisors and circuit breakers and fanned
//! out to any number of subscribers. They are serializable so they can be
//! logged, shipped to monitoring, or inspected in tests.

use crate::health::{CircuitState, HealthCheckResult};
use crate::worker::{WorkerExit, WorkerState};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Events emitted by the supervision engine
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "eventType", rename_all = "camelCase")]
pub enum SupervisorEvent {
    /// Worker state has changed
    StateChanged {
        /// Worker identifier
        worker_id: String,
        /// Previous state
        from_state: WorkerState,
        /// New state
        to_state: WorkerState,
        /// Event timestamp in RFC3339 format
        timestamp: String,
        /// Optional reason for the state change
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Worker process has started
    ProcessStarted {
        /// Worker identifier
        worker_id: String,
        /// Process ID of the started worker
        pid: u32,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// Worker process has exited
    ProcessExited {
        /// Worker identifier
        worker_id: String,
        /// Exit information
        exit_info: WorkerExit,
        /// How long the process was up, in milliseconds
        uptime_ms: u64,
    },

    /// Result of a health check against a worker process
    HealthCheckResult {
        /// Worker identifier
        worker_id: String,
        /// Probe outcome
        result: HealthCheckResult,
    },

    /// A restart has been scheduled after a backoff delay
    RestartScheduled {
        /// Worker identifier
        worker_id: String,
        /// Delay before restart in milliseconds
        delay_ms: u64,
        /// Restart attempt within the current window (1-indexed)
        attempt: u32,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// The restart budget is exhausted; the worker will not be restarted
    PermanentFailure {
        /// Worker identifier
        worker_id: String,
        /// Exits recorded in the window when the budget ran out
        restarts_in_window: u32,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// A circuit breaker changed state
    CircuitStateChanged {
        /// Breaker (dependency) name
        breaker: String,
        /// Owning worker, if the breaker belongs to a worker supervisor
        #[serde(skip_serializing_if = "Option::is_none")]
        worker_id: Option<String>,
        /// Previous state
        from_state: CircuitState,
        /// New state
        to_state: CircuitState,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// A warning condition has occurred
    Warning {
        /// Worker identifier
        worker_id: String,
        /// Warning message
        message: String,
        /// Event timestamp in RFC3339 format
        timestamp: String,
        /// Optional warning code for categorization
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

/// Event severity level for filtering and alerting
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord,
)]
#[serde(rename_all = "camelCase")]
pub enum EventSeverity {
    /// Debug information
    Debug,
    /// Informational events
    Info,
    /// Warning conditions
    Warning,
    /// Error conditions
    Error,
    /// Critical conditions requiring immediate attention
    Critical,
}

impl SupervisorEvent {
    /// Get the worker ID for this event, if it concerns a worker
    #[must_use]
    pub fn worker_id(&self) -> Option<&str> {
        match self {
            Self::StateChanged { worker_id, .. }
            | Self::ProcessStarted { worker_id, .. }
            | Self::ProcessExited { worker_id, .. }
            | Self::HealthCheckResult { worker_id, .. }
            | Self::RestartScheduled { worker_id, .. }
            | Self::PermanentFailure { worker_id, .. }
            | Self::Warning { worker_id, .. } => Some(worker_id),
            Self::CircuitStateChanged { worker_id, .. } => worker_id.as_deref(),
        }
    }

    /// Get the severity level for this event
    #[must_use]
    pub fn severity(&self) -> EventSeverity {
        match self {
            Self::StateChanged { .. } | Self::ProcessStarted { .. } => EventSeverity::Info,
            Self::ProcessExited { exit_info, .. } => {
                if exit_info.is_success() {
                    EventSeverity::Info
                } else {
                    EventSeverity::Warning
                }
            }
            Self::HealthCheckResult { result, .. } => {
                if result.healthy {
                    EventSeverity::Debug
                } else {
                    EventSeverity::Warning
                }
            }
            Self::CircuitStateChanged { to_state, .. } => match to_state {
                CircuitState::Open => EventSeverity::Error,
                _ => EventSeverity::Info,
            },
            Self::RestartScheduled { .. } | Self::Warning { .. } => EventSeverity::Warning,
            Self::PermanentFailure { .. } => EventSeverity::Critical,
        }
    }

    /// Create a state changed event
    #[must_use]
    pub fn state_changed(
        worker_id: String,
        from_state: WorkerState,
        to_state: WorkerState,
        reason: Option<String>,
    ) -> Self {
        Self::StateChanged {
            worker_id,
            from_state,
            to_state,
            timestamp: crate::current_timestamp(),
            reason,
        }
    }

    /// Create a warning event
    #[must_use]
    pub fn warning(worker_id: String, message: impl Into<String>, code: Option<&str>) -> Self {
        Self::Warning {
            worker_id,
            message: message.into(),
            timestamp: crate::current_timestamp(),
            code: code.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let event = SupervisorEvent::state_changed(
            "api".to_string(),
            WorkerState::Starting,
            WorkerState::Running,
            None,
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["eventType"], "stateChanged");
        assert_eq!(value["workerId"], "api");
        assert_eq!(value["toState"], "running");
        assert!(value.get("reason").is_none());
    }

    #[test]
    fn test_severity() {
        let failure = SupervisorEvent::PermanentFailure {
            worker_id: "api".to_string(),
            restarts_in_window: 3,
            timestamp: crate::current_timestamp(),
        };
        assert_eq!(failure.severity(), EventSeverity::Critical);

        let trip = SupervisorEvent::CircuitStateChanged {
            breaker: "db".to_string(),
            worker_id: None,
            from_state: CircuitState::Closed,
            to_state: CircuitState::Open,
            timestamp: crate::current_timestamp(),
        };
        assert_eq!(trip.severity(), EventSeverity::Error);
        assert_eq!(trip.worker_id(), None);
    }
}
