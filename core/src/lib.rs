//! Core functionality for warden
//!
//! This crate contains the supervision engine: health probes, circuit
//! breakers, the restart policy, per-worker supervisor tasks, the supervisor
//! group and the health aggregator that folds them into one report.

pub mod aggregator;
pub mod breaker;
pub mod config;
pub mod dependency;
pub mod error;
pub mod group;
pub mod health;
pub mod history;
pub mod memory;
#[cfg(unix)]
pub mod process;
pub mod schedule;
pub mod supervisor;


// Re-export schema types for convenience
pub use schema::*;

pub use aggregator::HealthAggregator;
pub use breaker::{BreakerError, CircuitBreaker};
pub use dependency::Dependency;
pub use error::{CoreError, Result};
pub use group::SupervisorGroup;
pub use memory::{FixedMemory, MemorySampler, SystemMemory};

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    ///
    /// `RUST_LOG` takes precedence over `level`.
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| crate::CoreError::InitializationError(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_fails() {
        let first = utils::init_tracing("debug");
        let second = utils::init_tracing("debug");
        // Another test may have installed a subscriber first
        assert!(first.is_ok() || matches!(first, Err(CoreError::InitializationError(_))));
        assert!(matches!(second, Err(CoreError::InitializationError(_))));
    }
}
