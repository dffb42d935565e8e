//! Core error types and utilities

use schema::WorkerState;
use thiserror::Error;

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("Supervisor error: {0}")]
    SupervisorError(String),

    #[error("Worker '{0}' is already supervised")]
    AlreadyExists(String),

    #[error("No worker named '{0}'")]
    NotFound(String),

    #[error("Worker '{worker}' cannot {operation} while {state:?}")]
    InvalidState {
        worker: String,
        operation: &'static str,
        state: WorkerState,
    },

    #[error("Circuit '{0}' is open")]
    CircuitOpen(String),

    #[error("Process spawn error: {0}")]
    ProcessSpawn(String),

    #[error("Process signal error: {0}")]
    ProcessSignal(String),

    #[error("Process wait error: {0}")]
    ProcessWait(String),

    #[error("IPC error: {0}")]
    Ipc(#[from] ipc::IpcError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Other(String),
}

impl CoreError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ConfigurationError(_) => "CORE001",
            CoreError::ValidationError(_) => "CORE002",
            CoreError::InitializationError(_) => "CORE003",
            CoreError::SupervisorError(_) => "CORE004",
            CoreError::IoError(_) => "CORE005",
            CoreError::SerializationError(_) => "CORE006",
            CoreError::AlreadyExists(_) => "CORE007",
            CoreError::NotFound(_) => "CORE008",
            CoreError::InvalidState { .. } => "CORE009",
            CoreError::CircuitOpen(_) => "CORE010",
            CoreError::ProcessSpawn(_) => "CORE011",
            CoreError::ProcessSignal(_) => "CORE012",
            CoreError::ProcessWait(_) => "CORE013",
            CoreError::Ipc(_) => "CORE014",
            CoreError::Other(_) => "CORE999",
        }
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;

impl From<&str> for CoreError {
    fn from(s: &str) -> Self {
        CoreError::Other(s.to_string())
    }
}

impl From<String> for CoreError {
    fn from(s: String) -> Self {
        CoreError::Other(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(CoreError::ConfigurationError("test".to_string()).code(), "CORE001");
        assert_eq!(CoreError::ValidationError("test".to_string()).code(), "CORE002");
        assert_eq!(CoreError::AlreadyExists("api".to_string()).code(), "CORE007");
        assert_eq!(CoreError::CircuitOpen("db".to_string()).code(), "CORE010");
        assert_eq!(CoreError::Other("test".to_string()).code(), "CORE999");
    }

    #[test]
    fn test_error_display() {
        let error = CoreError::InvalidState {
            worker: "api".to_string(),
            operation: "start",
            state: WorkerState::Running,
        };
        assert_eq!(error.to_string(), "Worker 'api' cannot start while Running");
    }
}
