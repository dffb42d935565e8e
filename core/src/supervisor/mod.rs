//! Worker supervisor implementation
//!
//! Each supervised worker gets its own tokio task (an actor) that owns the
//! process handle, the restart history and every timer for that worker.
//! Operations arrive as [`ControlMsg`]s and are handled one at a time, so a
//! restart decision can never interleave with a `stop()`.
//!
//! ```text
//! Stopped → Starting → Running → Stopping → Stopped
//!              ▲          │
//!              └──────────┘  exit, restart allowed (after backoff)
//!   Starting/Running ──exit, budget exhausted──▶ Failed
//! ```
//!
//! ## Components
//!
//! - [`SupervisorHandle`]: Control interface for one worker
//! - [`ControlMsg`]: Requests sent to the worker's task
//! - [`ProcessAdapter`]: Trait for abstracting process management
//! - [`WorkerSupervisor`]: The per-worker task

use crate::dependency::Dependency;
use crate::{CoreError, Result};
use schema::{SupervisionConfig, SupervisorEvent, WorkerSpec, WorkerState, WorkerStats};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{error, info};

pub mod adapters;
pub mod restart_policy;
pub mod worker_task;

#[cfg(test)]
mod restart_policy_tests;

pub use adapters::*;
pub use restart_policy::*;
pub use worker_task::*;

/// Default capacity of each worker dependency's result history
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Requests handled by a worker's task
#[derive(Debug)]
pub enum ControlMsg {
    /// Start the worker (valid from `Stopped` or `Failed`)
    Start { reply: oneshot::Sender<Result<()>> },
    /// Stop the worker gracefully
    Stop { reply: oneshot::Sender<Result<()>> },
    /// Snapshot the worker's statistics
    Status { reply: oneshot::Sender<WorkerStats> },
    /// Stop the worker and end its task
    Shutdown { reply: oneshot::Sender<()> },
}

/// Handle for controlling a supervisor instance
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    id: String,
    control_tx: mpsc::UnboundedSender<ControlMsg>,
    state_rx: watch::Receiver<WorkerState>,
}

impl SupervisorHandle {
    /// Worker identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> ControlMsg) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.control_tx
            .send(build(reply))
            .map_err(|_| self.task_gone())?;
        response.await.map_err(|_| self.task_gone())
    }

    fn task_gone(&self) -> CoreError {
        CoreError::SupervisorError(format!("Supervisor task for '{}' has shut down", self.id))
    }

    /// Start the worker
    ///
    /// Fails with [`CoreError::InvalidState`] unless the worker is `Stopped`
    /// or `Failed`.
    pub async fn start(&self) -> Result<()> {
        self.request(|reply| ControlMsg::Start { reply }).await?
    }

    /// Stop the worker, returning once it has reached `Stopped`
    ///
    /// A `Failed` worker is left as it is.
    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| ControlMsg::Stop { reply }).await?
    }

    /// Current statistics of the worker
    pub async fn status(&self) -> Result<WorkerStats> {
        self.request(|reply| ControlMsg::Status { reply }).await
    }

    /// Stop the worker and terminate its task
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| ControlMsg::Shutdown { reply }).await
    }

    /// Get the current state of the worker
    pub fn current_state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe_to_state(&self) -> watch::Receiver<WorkerState> {
        self.state_rx.clone()
    }
}

/// Configuration for spawning a supervisor
pub struct SupervisorConfig {
    pub spec: WorkerSpec,
    /// Shared, read-only supervision settings
    pub supervision: Arc<SupervisionConfig>,
    pub process_adapter: Arc<dyn ProcessAdapter>,
    /// Event bus the supervisor publishes on
    pub event_tx: broadcast::Sender<SupervisorEvent>,
    /// Capacity of each dependency's result history
    pub history_capacity: usize,
}

/// Spawn a supervisor task for one worker
///
/// The worker starts in `Stopped`; call [`SupervisorHandle::start`] to run it.
pub fn spawn_supervisor(config: SupervisorConfig) -> SupervisorHandle {
    let dependencies = config
        .spec
        .dependencies
        .iter()
        .map(|dep| {
            Arc::new(Dependency::from_spec(
                dep,
                config.supervision.circuit_breaker,
                config.supervision.health_check_timeout(),
                config.history_capacity,
            ))
        })
        .collect();
    spawn_supervisor_with_dependencies(config, dependencies)
}

/// Spawn a supervisor that guards already-built dependencies
///
/// The spec's own dependency list is ignored.
pub fn spawn_supervisor_with_dependencies(
    config: SupervisorConfig,
    dependencies: Vec<Arc<Dependency>>,
) -> SupervisorHandle {
    let SupervisorConfig {
        spec,
        supervision,
        process_adapter,
        event_tx,
        history_capacity: _,
    } = config;

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(WorkerState::Stopped);

    info!("Spawning supervisor for worker '{}'", spec.id);

    let id = spec.id.clone();
    let worker_id = spec.id.clone();
    tokio::spawn(async move {
        let supervisor = WorkerSupervisor::new(
            spec,
            supervision,
            process_adapter,
            event_tx,
            state_tx,
            dependencies,
        );
        if let Err(e) = supervisor.run(control_rx).await {
            error!("Supervisor task for worker '{}' failed: {}", worker_id, e);
        }
        info!("Supervisor task for worker '{}' terminated", worker_id);
    });

    SupervisorHandle {
        id,
        control_tx,
        state_rx,
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use std::time::Duration;

    fn spawn_mock(adapter: MockProcessAdapter) -> SupervisorHandle {
        let (event_tx, _) = broadcast::channel(64);
        spawn_supervisor(SupervisorConfig {
            spec: WorkerSpec::new("unit", "mock"),
            supervision: Arc::new(SupervisionConfig::default()),
            process_adapter: Arc::new(adapter),
            event_tx,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_reports_initial_state() {
        let handle = spawn_mock(MockProcessAdapter::default());
        assert_eq!(handle.id(), "unit");
        assert_eq!(handle.current_state(), WorkerState::Stopped);
        let stats = handle.status().await.unwrap();
        assert_eq!(stats.state, WorkerState::Stopped);
        assert_eq!(stats.pid, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_is_rejected() {
        let handle = spawn_mock(MockProcessAdapter::default());
        handle.start().await.unwrap();
        match handle.start().await {
            Err(CoreError::InvalidState { operation, .. }) => assert_eq!(operation, "start"),
            other => panic!("expected InvalidState, got {other:?}"),
        }
        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_after_shutdown_fail() {
        let handle = spawn_mock(MockProcessAdapter::default());
        handle.start().await.unwrap();
        handle.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(
            handle.status().await,
            Err(CoreError::SupervisorError(_))
        ));
    }
}
