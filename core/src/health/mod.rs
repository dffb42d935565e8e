//! Health checking and probing functionality
//!
//! ## Types
//!
//! - [`Probe`]: The main trait for health check implementations
//! - [`TcpProbe`]: TCP connection-based health checking
//! - [`HttpProbe`]: HTTP GET-based health checking
//! - [`SchedulerLagProbe`]: local check that the runtime can still schedule work
//! - [`FnProbe`]: wraps an arbitrary async operation
//! - [`HealthError`]: Error types for health check failures
//!
//! [`run_probe`] is the entry point used by the supervisor and aggregator: it
//! bounds a probe by a timeout and produces a `schema::HealthCheckResult`.

pub mod error;
pub mod func;
pub mod http;
pub mod lag;
pub mod tcp;
pub mod types;

pub use error::HealthError;
pub use func::FnProbe;
pub use http::HttpProbe;
pub use lag::{scheduler_round_trip, SchedulerLagProbe};
pub use tcp::TcpProbe;
pub use types::{run_probe, Probe};

use schema::ProbeSpec;
use std::sync::Arc;
use std::time::Duration;

/// Create a probe from a schema probe specification
///
/// `timeout` bounds the connect phase of TCP probes, the request of HTTP
/// probes and the allowed lag of the scheduler probe.
pub fn create_probe(spec: &ProbeSpec, timeout: Duration) -> Arc<dyn Probe> {
    match spec {
        ProbeSpec::Tcp { host, port } => Arc::new(TcpProbe::new(host.clone(), *port, timeout)),
        ProbeSpec::Http { url, expect } => Arc::new(HttpProbe::new(url.clone(), expect.clone(), timeout)),
        ProbeSpec::SchedulerLag => Arc::new(SchedulerLagProbe::new(timeout)),
    }
}
