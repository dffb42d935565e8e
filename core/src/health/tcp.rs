//! TCP connection health probing

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::{HealthError, Probe};

/// Probe that passes when a TCP connection to `host:port` can be established
///
/// The connection is dropped as soon as it is open.
///
/// ```rust
/// use warden_core::health::{run_probe, TcpProbe};
/// use std::time::Duration;
///
/// # async fn example() {
/// let probe = TcpProbe::new("127.0.0.1", 5432, Duration::from_secs(2));
/// let result = run_probe(&probe, Duration::from_secs(2)).await;
/// println!("postgres healthy: {}", result.healthy);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpProbe {
    /// Create a probe for `host:port` with its own connect timeout
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
        }
    }

    /// Get the target address as a string
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self) -> Result<(), HealthError> {
        let address = self.address();
        match timeout(self.connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(_stream)) => {
                debug!("TCP probe to {} succeeded", address);
                Ok(())
            }
            Ok(Err(io_error)) => {
                debug!("TCP probe to {} failed: {}", address, io_error);
                Err(HealthError::Tcp(io_error))
            }
            Err(_) => {
                debug!("TCP probe to {} timed out after {:?}", address, self.connect_timeout);
                Err(HealthError::Timeout(self.connect_timeout))
            }
        }
    }
}
