//! Supervisor/worker wire messages
//!
//! Messages are JSON objects discriminated by a `type` field:
//!
//! ```text
//! supervisor -> worker   {"type":"health_check"}
//! worker -> supervisor   {"type":"health_check_response","timestamp":"..."}
//! supervisor -> worker   {"type":"shutdown"}
//! worker -> supervisor   {"type":"ready"}
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A message exchanged with a worker process
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Liveness request sent by the supervisor
    HealthCheck,
    /// Worker reply to a health check
    HealthCheckResponse {
        /// Worker-side timestamp of the reply
        timestamp: String,
        /// Optional worker-supplied detail
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
    /// Graceful shutdown request sent by the supervisor
    Shutdown,
    /// Worker announcement that it is ready to serve
    Ready,
}

impl WorkerMessage {
    /// Build a health check response stamped with the current time
    pub fn health_check_response() -> Self {
        WorkerMessage::HealthCheckResponse {
            timestamp: crate::current_timestamp(),
            details: None,
        }
    }

    /// Short name of the message type, matching the wire `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::HealthCheck => "health_check",
            WorkerMessage::HealthCheckResponse { .. } => "health_check_response",
            WorkerMessage::Shutdown => "shutdown",
            WorkerMessage::Ready => "ready",
        }
    }
}
