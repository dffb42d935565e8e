//! Probes backed by an async closure

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::{HealthError, Probe};

type ProbeFuture = Pin<Box<dyn Future<Output = Result<(), HealthError>> + Send>>;

/// Probe that calls a closure returning a future
///
/// Wraps any external operation (a database ping, an RPC) as a probe.
#[derive(Clone)]
pub struct FnProbe {
    f: Arc<dyn Fn() -> ProbeFuture + Send + Sync>,
}

impl FnProbe {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HealthError>> + Send + 'static,
    {
        Self {
            f: Arc::new(move || Box::pin(f())),
        }
    }
}

impl fmt::Debug for FnProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProbe").finish_non_exhaustive()
    }
}

#[async_trait]
impl Probe for FnProbe {
    async fn check(&self) -> Result<(), HealthError> {
        (self.f)().await
    }
}
