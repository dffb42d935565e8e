//! System-wide health aggregation
//!
//! The [`HealthAggregator`] polls its registered dependencies, the workers of
//! an attached [`SupervisorGroup`] and a [`MemorySampler`], and folds them
//! into one [`HealthReport`]:
//!
//! - **ready**: every dependency is ready (see [`Dependency::is_ready`])
//! - **live**: a no-op task round-trip completes within `livenessBoundMs`
//! - **score**: `100 * (wm * (1 - pressure) + wd * deps + ww * workers) / (wm + wd + ww)`
//!   where `deps` and `workers` are healthy fractions, 1.0 for an empty set
//!
//! "Dependencies" covers both the aggregator's own and the breakers owned by
//! every `Starting` or `Running` worker of the group. Worker-owned breakers
//! are probed by their supervisors; the aggregator reads their reports from
//! the worker statistics. A breaker transition on the group's bus refreshes
//! the report without waiting for the next poll.

use crate::dependency::Dependency;
use crate::group::SupervisorGroup;
use crate::health::scheduler_round_trip;
use crate::memory::{MemorySampler, SystemMemory};
use crate::{CoreError, Result};
use parking_lot::RwLock;
use schema::{
    AggregatorConfig, CircuitBreakerConfig, DependencySpec, HealthLevel, HealthReport,
    ScoreThresholds, ScoreWeights, SupervisorEvent, WorkerState,
};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Weighted health score in `0.0..=100.0`
///
/// Returns 0 when every weight is 0.
pub fn health_score(
    weights: &ScoreWeights,
    memory_pressure: f64,
    dependency_fraction: f64,
    worker_fraction: f64,
) -> f64 {
    let total = weights.total();
    if total <= 0.0 {
        return 0.0;
    }
    let weighted = weights.memory * (1.0 - memory_pressure)
        + weights.dependencies * dependency_fraction
        + weights.workers * worker_fraction;
    (100.0 * weighted / total).clamp(0.0, 100.0)
}

/// Classify a score against the configured thresholds
pub fn classify(score: f64, thresholds: &ScoreThresholds) -> HealthLevel {
    if score >= thresholds.healthy {
        HealthLevel::Healthy
    } else if score >= thresholds.degraded {
        HealthLevel::Degraded
    } else {
        HealthLevel::Unhealthy
    }
}

fn fraction(healthy: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        healthy as f64 / total as f64
    }
}

pub struct HealthAggregator {
    config: Arc<AggregatorConfig>,
    breaker_config: CircuitBreakerConfig,
    dependencies: RwLock<Vec<Arc<Dependency>>>,
    group: Option<Arc<SupervisorGroup>>,
    memory: Arc<dyn MemorySampler>,
    event_tx: Option<broadcast::Sender<SupervisorEvent>>,
    latest: watch::Sender<Option<HealthReport>>,
}

impl std::fmt::Debug for HealthAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthAggregator")
            .field("config", &self.config)
            .field("dependencies", &self.dependencies.read().len())
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

impl HealthAggregator {
    /// `breaker_config` applies to dependencies registered from a [`DependencySpec`]
    pub fn new(config: Arc<AggregatorConfig>, breaker_config: CircuitBreakerConfig) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            config,
            breaker_config,
            dependencies: RwLock::new(Vec::new()),
            group: None,
            memory: Arc::new(SystemMemory::new()),
            event_tx: None,
            latest,
        }
    }

    /// Include this group's workers, and publish breaker transitions on its bus
    pub fn with_group(mut self, group: Arc<SupervisorGroup>) -> Self {
        self.event_tx = Some(group.event_sender());
        self.group = Some(group);
        self
    }

    pub fn with_memory_sampler(mut self, sampler: Arc<dyn MemorySampler>) -> Self {
        self.memory = sampler;
        self
    }

    /// Register a dependency; names must be unique
    ///
    /// With an event bus attached, its breaker transitions are published as
    /// [`SupervisorEvent::CircuitStateChanged`] without a worker id.
    pub fn register(&self, dependency: Arc<Dependency>) -> Result<()> {
        {
            let mut dependencies = self.dependencies.write();
            if dependencies.iter().any(|d| d.name() == dependency.name()) {
                return Err(CoreError::AlreadyExists(dependency.name().to_string()));
            }
            dependencies.push(Arc::clone(&dependency));
        }
        info!("Registered dependency '{}'", dependency.name());
        self.forward_transitions(&dependency);
        Ok(())
    }

    /// Build a dependency from its spec and register it
    pub fn register_spec(&self, spec: &DependencySpec) -> Result<Arc<Dependency>> {
        let dependency = Arc::new(Dependency::from_spec(
            spec,
            self.breaker_config,
            self.config.probe_timeout(),
            self.config.history_capacity,
        ));
        self.register(Arc::clone(&dependency))?;
        Ok(dependency)
    }

    pub fn dependencies(&self) -> Vec<Arc<Dependency>> {
        self.dependencies.read().clone()
    }

    fn forward_transitions(&self, dependency: &Dependency) {
        let Some(event_tx) = self.event_tx.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                "No runtime to forward transitions of '{}', events will not be published",
                dependency.name()
            );
            return;
        };
        let mut transitions = dependency.breaker().subscribe();
        runtime.spawn(async move {
            loop {
                match transitions.recv().await {
                    Ok(t) => {
                        let _ = event_tx.send(SupervisorEvent::CircuitStateChanged {
                            breaker: t.breaker,
                            worker_id: None,
                            from_state: t.from,
                            to_state: t.to,
                            timestamp: t.timestamp,
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Transition forwarder skipped {} transitions", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Whether a no-op task completes within the liveness bound
    async fn check_liveness(&self) -> bool {
        let bound = self.config.liveness_bound();
        match tokio::time::timeout(bound, scheduler_round_trip()).await {
            Ok(Ok(lag)) => lag <= bound,
            Ok(Err(e)) => {
                error!("Liveness round-trip failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Scheduler round-trip exceeded {:?}", bound);
                false
            }
        }
    }

    /// Probe everything once and publish the resulting report
    ///
    /// Always produces a report: failing dependencies lower the score.
    pub async fn poll_once(&self) -> HealthReport {
        self.check_dependencies().await;
        self.refresh().await
    }

    async fn check_dependencies(&self) {
        let mut checks = JoinSet::new();
        for dependency in &self.dependencies() {
            let dependency = Arc::clone(dependency);
            checks.spawn(async move {
                dependency.check().await;
            });
        }
        while let Some(joined) = checks.join_next().await {
            if let Err(e) = joined {
                error!("Dependency check panicked: {}", e);
            }
        }
    }

    /// Rebuild and publish the report from current state, without probing
    pub async fn refresh(&self) -> HealthReport {
        let live = self.check_liveness().await;
        let workers = match &self.group {
            Some(group) => group.status().await,
            None => Default::default(),
        };
        let memory_pressure = self.memory.pressure();

        let reports: Vec<_> = self.dependencies().iter().map(|d| d.report()).collect();
        let worker_dependencies: Vec<_> = workers
            .values()
            .filter(|w| matches!(w.state, WorkerState::Starting | WorkerState::Running))
            .flat_map(|w| w.dependencies.iter())
            .collect();
        let total_dependencies = reports.len() + worker_dependencies.len();
        let healthy_dependencies = reports
            .iter()
            .chain(worker_dependencies.iter().copied())
            .filter(|r| r.healthy)
            .count();
        let running = workers
            .values()
            .filter(|w| w.state == WorkerState::Running)
            .count();

        let score = health_score(
            &self.config.weights,
            memory_pressure,
            fraction(healthy_dependencies, total_dependencies),
            fraction(running, workers.len()),
        );
        let report = HealthReport {
            score,
            status: classify(score, &self.config.thresholds),
            ready: healthy_dependencies == total_dependencies,
            live,
            memory_pressure,
            dependencies: reports,
            workers,
            timestamp: schema::current_timestamp(),
        };
        debug!(
            "Health score {:.1} ({:?}), ready={}, live={}",
            report.score, report.status, report.ready, report.live
        );

        self.latest.send_replace(Some(report.clone()));
        report
    }

    /// Most recent report, if a poll has completed
    pub fn latest_report(&self) -> Option<HealthReport> {
        self.latest.borrow().clone()
    }

    /// Watch each new report
    pub fn subscribe_reports(&self) -> watch::Receiver<Option<HealthReport>> {
        self.latest.subscribe()
    }

    /// Poll on the configured interval until `token` is cancelled
    ///
    /// Breaker transitions published on the group's bus trigger a
    /// [`refresh`](Self::refresh) in between polls.
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.poll_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut events = self.group.as_ref().map(|group| group.subscribe());
            info!("Health aggregator polling every {:?}", self.config.poll_interval());
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.poll_once().await;
                    }
                    event = next_event(&mut events) => match event {
                        Ok(SupervisorEvent::CircuitStateChanged { breaker, to_state, .. }) => {
                            debug!("Breaker '{}' is now {:?}, refreshing report", breaker, to_state);
                            self.refresh().await;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!("Aggregator skipped {} events", skipped);
                            self.refresh().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => events = None,
                    },
                }
            }
            info!("Health aggregator stopped");
        })
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<SupervisorEvent>>,
) -> std::result::Result<SupervisorEvent, broadcast::error::RecvError> {
    match events.as_mut() {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
