//! Error types for health checking operations

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during health check operations
#[derive(Error, Debug)]
pub enum HealthError {
    /// The health check timed out
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// TCP connection failed
    #[error("tcp connection failed: {0}")]
    Tcp(#[from] std::io::Error),

    /// HTTP request failed
    #[error("http request failed: {0}")]
    Http(#[from] hyper::Error),

    /// The probe URL does not parse
    #[error("invalid url: {0}")]
    InvalidUri(#[from] hyper::http::uri::InvalidUri),

    /// The request could not be built
    #[error("invalid request: {0}")]
    Request(#[from] hyper::http::Error),

    /// The response status did not match the expectation
    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),

    /// The response body did not contain the expected text
    #[error("response body did not match")]
    BodyMismatch,

    /// A no-op task took longer than allowed to be scheduled and joined
    #[error("scheduler lag {lag:?} exceeds {bound:?}")]
    SchedulerLag { lag: Duration, bound: Duration },

    /// A custom probe reported failure
    #[error("{0}")]
    Failed(String),
}

impl HealthError {
    /// Short description recorded in a failing `HealthCheckResult`
    pub fn describe(&self) -> String {
        match self {
            HealthError::Timeout(_) => "timeout".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_describes_as_timeout() {
        assert_eq!(HealthError::Timeout(Duration::from_secs(1)).describe(), "timeout");
        assert_eq!(HealthError::Failed("db down".to_string()).describe(), "db down");
    }
}
