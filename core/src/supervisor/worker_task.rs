//! Worker supervisor task implementation
//!
//! [`WorkerSupervisor`] is the state machine for a single worker. It runs as
//! one task and reacts to four sources: control requests, its own timers,
//! messages from the worker, and the worker's exit. Timers are
//! [`TimerSlot`]s whose messages carry an id, so a timer cancelled by `stop()`
//! can never take effect later even if its message was already queued.
//! Dependency probes run in their own tasks under a cancellation token that
//! `stop()` cancels.

use super::{ControlMsg, ProcessAdapter, RestartAction, RestartPolicyEngine, RestartRecord, WorkerProcess};
use crate::dependency::Dependency;
use crate::health::types::elapsed_ms;
use crate::schedule::{TimerId, TimerSlot};
use crate::{CoreError, Result};
use schema::{
    CircuitState, HealthCheckResult, StateTransition, SupervisionConfig, SupervisorEvent,
    WorkerExit, WorkerMessage, WorkerSpec, WorkerState, WorkerStats,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Slack added to the breaker open timeout before a recovery probe
const RECOVERY_SLACK: Duration = Duration::from_millis(1);

/// Messages the task sends to itself
#[derive(Debug)]
pub(crate) enum Internal {
    RestartDue(TimerId),
    HealthTick(TimerId),
    HealthTimeout(TimerId),
    RecoveryDue { index: usize, id: TimerId },
    Breaker { index: usize, transition: StateTransition },
}

/// The running worker
struct Attached {
    process: Arc<dyn WorkerProcess>,
    started_at: Instant,
    started_at_wall: String,
}

/// Per-worker supervision task
pub struct WorkerSupervisor {
    spec: WorkerSpec,
    config: Arc<SupervisionConfig>,
    state: WorkerState,
    process_adapter: Arc<dyn ProcessAdapter>,
    event_tx: broadcast::Sender<SupervisorEvent>,
    state_tx: watch::Sender<WorkerState>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: Option<mpsc::UnboundedReceiver<Internal>>,
    attached: Option<Attached>,
    worker_messages: Option<mpsc::UnboundedReceiver<WorkerMessage>>,
    worker_exit: Option<oneshot::Receiver<WorkerExit>>,
    restart_policy_engine: RestartPolicyEngine,
    restart_timer: TimerSlot,
    health_timer: TimerSlot,
    health_timeout: TimerSlot,
    /// When the in-flight health check was sent
    pending_check: Option<Instant>,
    consecutive_health_failures: u32,
    last_health_check: Option<HealthCheckResult>,
    last_exit_code: Option<i32>,
    last_exit_signal: Option<i32>,
    dependencies: Vec<Arc<Dependency>>,
    recovery_timers: Vec<TimerSlot>,
    /// Cancels every in-flight dependency probe
    dependency_probes: CancellationToken,
    breaker_forwarders: Vec<JoinHandle<()>>,
}

impl WorkerSupervisor {
    /// Create a supervisor in `Stopped`
    pub fn new(
        spec: WorkerSpec,
        config: Arc<SupervisionConfig>,
        process_adapter: Arc<dyn ProcessAdapter>,
        event_tx: broadcast::Sender<SupervisorEvent>,
        state_tx: watch::Sender<WorkerState>,
        dependencies: Vec<Arc<Dependency>>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let restart_policy_engine = RestartPolicyEngine::new(Arc::clone(&config));
        let recovery_timers = dependencies.iter().map(|_| TimerSlot::new()).collect();
        Self {
            spec,
            config,
            state: WorkerState::Stopped,
            process_adapter,
            event_tx,
            state_tx,
            internal_tx,
            internal_rx: Some(internal_rx),
            attached: None,
            worker_messages: None,
            worker_exit: None,
            restart_policy_engine,
            restart_timer: TimerSlot::new(),
            health_timer: TimerSlot::new(),
            health_timeout: TimerSlot::new(),
            pending_check: None,
            consecutive_health_failures: 0,
            last_health_check: None,
            last_exit_code: None,
            last_exit_signal: None,
            dependencies,
            recovery_timers,
            dependency_probes: CancellationToken::new(),
            breaker_forwarders: Vec::new(),
        }
    }

    /// Run the supervisor task loop until shutdown or until every handle is dropped
    pub async fn run(mut self, mut control_rx: mpsc::UnboundedReceiver<ControlMsg>) -> Result<()> {
        let mut internal_rx = self
            .internal_rx
            .take()
            .ok_or_else(|| CoreError::SupervisorError("supervisor already running".to_string()))?;
        self.forward_breaker_transitions();

        loop {
            tokio::select! {
                msg = control_rx.recv() => match msg {
                    Some(ControlMsg::Shutdown { reply }) => {
                        info!("Shutdown requested for worker '{}'", self.spec.id);
                        self.stop_worker().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(msg) => self.handle_control_message(msg).await,
                    None => {
                        info!("Control channel closed, shutting down supervisor for '{}'", self.spec.id);
                        self.stop_worker().await;
                        break;
                    }
                },

                Some(event) = internal_rx.recv() => self.handle_internal(event).await,

                message = next_worker_message(&mut self.worker_messages), if self.worker_messages.is_some() => {
                    match message {
                        Some(message) => self.handle_worker_message(message),
                        None => {
                            debug!("Message stream of worker '{}' closed", self.spec.id);
                            self.worker_messages = None;
                        }
                    }
                }

                exit = wait_for_exit(&mut self.worker_exit), if self.worker_exit.is_some() => {
                    self.handle_process_exit(exit).await;
                }
            }
        }

        for forwarder in self.breaker_forwarders.drain(..) {
            forwarder.abort();
        }
        Ok(())
    }

    /// Relay each dependency breaker's transitions into this task
    fn forward_breaker_transitions(&mut self) {
        for (index, dependency) in self.dependencies.iter().enumerate() {
            let mut transitions = dependency.breaker().subscribe();
            let internal_tx = self.internal_tx.clone();
            self.breaker_forwarders.push(tokio::spawn(async move {
                loop {
                    match transitions.recv().await {
                        Ok(transition) => {
                            if internal_tx.send(Internal::Breaker { index, transition }).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!("Breaker forwarder skipped {} transitions", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }
    }

    async fn handle_control_message(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::Start { reply } => {
                let result = self.start_worker().await;
                let _ = reply.send(result);
            }
            ControlMsg::Stop { reply } => {
                self.stop_worker().await;
                let _ = reply.send(Ok(()));
            }
            ControlMsg::Status { reply } => {
                let _ = reply.send(self.stats());
            }
            ControlMsg::Shutdown { reply } => {
                // Handled by the run loop
                let _ = reply.send(());
            }
        }
    }

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::RestartDue(id) => {
                if self.restart_timer.fire(id) {
                    self.restart_worker().await;
                }
            }
            Internal::HealthTick(id) => {
                if self.health_timer.fire(id) {
                    self.health_tick().await;
                }
            }
            Internal::HealthTimeout(id) => {
                if self.health_timeout.fire(id) {
                    self.health_check_timed_out().await;
                }
            }
            Internal::RecoveryDue { index, id } => {
                let due = self
                    .recovery_timers
                    .get_mut(index)
                    .is_some_and(|slot| slot.fire(id));
                if due {
                    self.probe_dependency(index);
                }
            }
            Internal::Breaker { index, transition } => self.handle_breaker_transition(index, transition),
        }
    }

    /// Operator start
    async fn start_worker(&mut self) -> Result<()> {
        if !self.state.can_start() {
            warn!(
                "Cannot start worker '{}' while {:?}",
                self.spec.id, self.state
            );
            return Err(CoreError::InvalidState {
                worker: self.spec.id.clone(),
                operation: "start",
                state: self.state,
            });
        }
        if self.state == WorkerState::Failed {
            self.restart_policy_engine.reset();
        }

        match self.spawn_process().await {
            Ok(()) => {
                self.transition_to(WorkerState::Starting, Some("start requested".to_string()));
                Ok(())
            }
            Err(e) => {
                error!("Failed to start worker '{}': {}", self.spec.id, e);
                self.emit_event(SupervisorEvent::warning(
                    self.spec.id.clone(),
                    e.to_string(),
                    Some("SPAWN_FAILED"),
                ));
                self.transition_to(WorkerState::Failed, Some(format!("spawn failed: {e}")));
                Err(e)
            }
        }
    }

    /// Spawn a process and attach to it; the state is left to the caller
    async fn spawn_process(&mut self) -> Result<()> {
        debug!("Spawning process for worker '{}'", self.spec.id);
        let spawned = self.process_adapter.spawn(&self.spec).await?;
        let pid = spawned.process.pid();

        self.attached = Some(Attached {
            process: spawned.process,
            started_at: Instant::now(),
            started_at_wall: schema::current_timestamp(),
        });
        self.worker_messages = Some(spawned.messages);
        self.worker_exit = Some(spawned.exit);
        self.pending_check = None;
        self.health_timeout.cancel();

        self.emit_event(SupervisorEvent::ProcessStarted {
            worker_id: self.spec.id.clone(),
            pid,
            timestamp: schema::current_timestamp(),
        });

        // First check goes out immediately; the pipe buffers it until the worker reads
        self.health_timer
            .schedule(Duration::ZERO, &self.internal_tx, Internal::HealthTick);
        Ok(())
    }

    /// A backoff timer fired
    async fn restart_worker(&mut self) {
        if self.state != WorkerState::Starting || self.attached.is_some() {
            return;
        }
        info!("Restarting worker '{}'", self.spec.id);
        if let Err(e) = self.spawn_process().await {
            warn!("Restart of worker '{}' failed to spawn: {}", self.spec.id, e);
            self.emit_event(SupervisorEvent::warning(
                self.spec.id.clone(),
                e.to_string(),
                Some("SPAWN_FAILED"),
            ));
            self.apply_restart_policy(RestartRecord {
                at: Instant::now(),
                exit_code: None,
                signal: None,
                uptime: Duration::ZERO,
            });
        }
    }

    /// Operator stop: cancel timers, ask the worker to exit, force-kill after the grace period
    async fn stop_worker(&mut self) {
        match self.state {
            WorkerState::Stopped | WorkerState::Failed => {
                debug!("Worker '{}' is {:?}, nothing to stop", self.spec.id, self.state);
                return;
            }
            WorkerState::Starting | WorkerState::Running | WorkerState::Stopping => {}
        }

        if self.restart_timer.cancel() {
            debug!("Cancelled pending restart of worker '{}'", self.spec.id);
        }
        self.cancel_health_timers();
        self.cancel_dependency_probes();

        self.transition_to(WorkerState::Stopping, Some("stop requested".to_string()));

        self.worker_messages = None;
        let exit = self.worker_exit.take();
        if let Some(attached) = self.attached.take() {
            let exit_info = self.shut_down_process(&attached, exit).await;
            self.record_exit(&exit_info, attached.started_at.elapsed());
        }

        self.transition_to(WorkerState::Stopped, Some("stopped".to_string()));
    }

    /// Send `shutdown`, wait out the grace period, then kill and wait once more
    async fn shut_down_process(
        &self,
        attached: &Attached,
        exit: Option<oneshot::Receiver<WorkerExit>>,
    ) -> WorkerExit {
        let pid = attached.process.pid();
        let Some(mut exit) = exit else {
            return unknown_exit(pid);
        };

        let grace = self.config.graceful_timeout();
        let delivered =
            match tokio::time::timeout(grace, attached.process.send(WorkerMessage::Shutdown)).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    debug!("Could not deliver shutdown to worker '{}': {}", self.spec.id, e);
                    true
                }
                Err(_) => {
                    warn!("Worker '{}' is not reading its input", self.spec.id);
                    false
                }
            };

        if delivered {
            if let Ok(result) = tokio::time::timeout(grace, &mut exit).await {
                return result.unwrap_or_else(|_| unknown_exit(pid));
            }
            warn!(
                "Worker '{}' did not exit within {:?}, killing it",
                self.spec.id, grace
            );
        }
        if let Err(e) = attached.process.kill().await {
            error!("Failed to kill worker '{}': {}", self.spec.id, e);
        }
        match tokio::time::timeout(grace, &mut exit).await {
            Ok(result) => result.unwrap_or_else(|_| unknown_exit(pid)),
            Err(_) => {
                error!("Worker '{}' did not exit after kill", self.spec.id);
                unknown_exit(pid)
            }
        }
    }

    fn cancel_health_timers(&mut self) {
        self.health_timer.cancel();
        self.health_timeout.cancel();
        self.pending_check = None;
    }

    fn cancel_dependency_probes(&mut self) {
        for slot in &mut self.recovery_timers {
            slot.cancel();
        }
        self.dependency_probes.cancel();
        self.dependency_probes = CancellationToken::new();
    }

    /// Periodic health check: send a request and arm its timeout
    async fn health_tick(&mut self) {
        if !matches!(self.state, WorkerState::Starting | WorkerState::Running) {
            return;
        }
        let Some(process) = self.attached.as_ref().map(|a| Arc::clone(&a.process)) else {
            return;
        };
        self.health_timer.schedule(
            self.config.health_check_interval(),
            &self.internal_tx,
            Internal::HealthTick,
        );

        for index in 0..self.dependencies.len() {
            self.probe_dependency(index);
        }

        if self.pending_check.is_some() {
            debug!("Previous health check of '{}' still in flight", self.spec.id);
            return;
        }

        // A worker that stops reading its input counts as unresponsive
        let sent_at = Instant::now();
        let limit = self.config.health_check_timeout();
        match tokio::time::timeout(limit, process.send(WorkerMessage::HealthCheck)).await {
            Ok(Ok(())) => {
                self.pending_check = Some(sent_at);
                let remaining = limit.saturating_sub(sent_at.elapsed());
                self.health_timeout
                    .schedule(remaining, &self.internal_tx, Internal::HealthTimeout);
            }
            Ok(Err(e)) => {
                debug!("Health check send to '{}' failed: {}", self.spec.id, e);
                self.record_health(HealthCheckResult::unhealthy(0, e.to_string()));
            }
            Err(_) => {
                self.pending_check = Some(sent_at);
                self.health_check_timed_out().await;
            }
        }
    }

    async fn health_check_timed_out(&mut self) {
        let Some(sent_at) = self.pending_check.take() else {
            return;
        };
        warn!(
            "Worker '{}' did not answer a health check within {:?}, killing it",
            self.spec.id,
            self.config.health_check_timeout()
        );
        self.record_health(HealthCheckResult::timeout(elapsed_ms(sent_at)));
        self.emit_event(SupervisorEvent::warning(
            self.spec.id.clone(),
            "health check timed out; forcing termination",
            Some("HEALTH_TIMEOUT"),
        ));
        if let Some(attached) = &self.attached {
            if let Err(e) = attached.process.kill().await {
                error!("Failed to kill unresponsive worker '{}': {}", self.spec.id, e);
            }
        }
    }

    fn handle_worker_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Ready => {
                if self.state == WorkerState::Starting {
                    self.transition_to(WorkerState::Running, Some("worker reported ready".to_string()));
                }
            }
            WorkerMessage::HealthCheckResponse { .. } => match self.pending_check.take() {
                Some(sent_at) => {
                    self.health_timeout.cancel();
                    self.record_health(HealthCheckResult::healthy(elapsed_ms(sent_at)));
                }
                None => debug!("Ignoring late health check response from '{}'", self.spec.id),
            },
            other => debug!(
                "Ignoring unexpected '{}' message from worker '{}'",
                other.kind(),
                self.spec.id
            ),
        }
    }

    fn record_health(&mut self, result: HealthCheckResult) {
        if result.healthy {
            self.consecutive_health_failures = 0;
            if self.state == WorkerState::Starting {
                self.transition_to(WorkerState::Running, Some("health check passed".to_string()));
            }
        } else {
            self.consecutive_health_failures += 1;
        }
        self.last_health_check = Some(result.clone());
        self.emit_event(SupervisorEvent::HealthCheckResult {
            worker_id: self.spec.id.clone(),
            result,
        });
    }

    async fn handle_process_exit(&mut self, exit: std::result::Result<WorkerExit, oneshot::error::RecvError>) {
        self.worker_exit = None;
        self.worker_messages = None;
        let Some(attached) = self.attached.take() else {
            return;
        };
        let exit_info = exit.unwrap_or_else(|_| unknown_exit(attached.process.pid()));
        let uptime = attached.started_at.elapsed();
        self.cancel_health_timers();

        info!(
            "Worker '{}' (pid {}) exited after {:?}: code={:?} signal={:?}",
            self.spec.id, exit_info.pid, uptime, exit_info.exit_code, exit_info.signal
        );
        self.record_exit(&exit_info, uptime);

        self.apply_restart_policy(RestartRecord {
            at: Instant::now(),
            exit_code: exit_info.exit_code,
            signal: exit_info.signal,
            uptime,
        });
    }

    fn record_exit(&mut self, exit_info: &WorkerExit, uptime: Duration) {
        self.last_exit_code = exit_info.exit_code;
        self.last_exit_signal = exit_info.signal;
        self.emit_event(SupervisorEvent::ProcessExited {
            worker_id: self.spec.id.clone(),
            exit_info: exit_info.clone(),
            uptime_ms: u64::try_from(uptime.as_millis()).unwrap_or(u64::MAX),
        });
    }

    fn apply_restart_policy(&mut self, record: RestartRecord) {
        match self.restart_policy_engine.record_exit(record) {
            RestartAction::Restart { delay, attempt } => {
                info!(
                    "Scheduling restart {} of worker '{}' in {:?}",
                    attempt, self.spec.id, delay
                );
                self.transition_to(WorkerState::Starting, Some("restart scheduled".to_string()));
                self.restart_timer
                    .schedule(delay, &self.internal_tx, Internal::RestartDue);
                self.emit_event(SupervisorEvent::RestartScheduled {
                    worker_id: self.spec.id.clone(),
                    delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    attempt,
                    timestamp: schema::current_timestamp(),
                });
            }
            RestartAction::GiveUp { restarts_in_window } => {
                error!(
                    "Worker '{}' failed permanently: {} exits within {:?}",
                    self.spec.id,
                    restarts_in_window,
                    self.config.restart_window()
                );
                self.restart_timer.cancel();
                self.cancel_dependency_probes();
                self.transition_to(WorkerState::Failed, Some("restart budget exhausted".to_string()));
                self.emit_event(SupervisorEvent::PermanentFailure {
                    worker_id: self.spec.id.clone(),
                    restarts_in_window,
                    timestamp: schema::current_timestamp(),
                });
            }
        }
    }

    /// Probe one dependency in the background while the worker is active
    fn probe_dependency(&self, index: usize) {
        if !self.is_active() {
            return;
        }
        if let Some(dependency) = self.dependencies.get(index) {
            let dependency = Arc::clone(dependency);
            let cancelled = self.dependency_probes.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancelled.cancelled() => {
                        debug!("Dependency probe of '{}' cancelled", dependency.name());
                    }
                    _ = dependency.check() => {}
                }
            });
        }
    }

    fn is_active(&self) -> bool {
        matches!(self.state, WorkerState::Starting | WorkerState::Running)
    }

    fn handle_breaker_transition(&mut self, index: usize, transition: StateTransition) {
        self.emit_event(SupervisorEvent::CircuitStateChanged {
            breaker: transition.breaker.clone(),
            worker_id: Some(self.spec.id.clone()),
            from_state: transition.from,
            to_state: transition.to,
            timestamp: transition.timestamp,
        });

        if transition.to != CircuitState::Open || !self.is_active() {
            return;
        }
        let Some(dependency) = self.dependencies.get(index) else {
            return;
        };
        let delay = dependency
            .breaker()
            .time_until_half_open()
            .unwrap_or_else(|| dependency.breaker().config().open_timeout())
            + RECOVERY_SLACK;
        if let Some(slot) = self.recovery_timers.get_mut(index) {
            debug!(
                "Scheduling recovery probe of '{}' for worker '{}' in {:?}",
                transition.breaker, self.spec.id, delay
            );
            slot.schedule(delay, &self.internal_tx, |id| Internal::RecoveryDue { index, id });
        }
    }

    /// Transition to a new state and emit events
    fn transition_to(&mut self, new_state: WorkerState, reason: Option<String>) {
        if self.state == new_state {
            return;
        }
        let old_state = self.state;
        self.state = new_state;
        debug!(
            "Worker '{}' transitioning from {:?} to {:?}",
            self.spec.id, old_state, new_state
        );
        self.state_tx.send_replace(new_state);
        self.emit_event(SupervisorEvent::state_changed(
            self.spec.id.clone(),
            old_state,
            new_state,
            reason,
        ));
    }

    fn emit_event(&self, event: SupervisorEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn stats(&self) -> WorkerStats {
        let now = Instant::now();
        WorkerStats {
            id: self.spec.id.clone(),
            state: self.state,
            pid: self.attached.as_ref().map(|a| a.process.pid()),
            started_at: self.attached.as_ref().map(|a| a.started_at_wall.clone()),
            uptime_ms: self
                .attached
                .as_ref()
                .map_or(0, |a| elapsed_ms(a.started_at)),
            total_restarts: self.restart_policy_engine.total_restarts(),
            restarts_in_window: u32::try_from(self.restart_policy_engine.restarts_in_window(now))
                .unwrap_or(u32::MAX),
            last_exit_code: self.last_exit_code,
            last_exit_signal: self.last_exit_signal,
            consecutive_health_failures: self.consecutive_health_failures,
            last_health_check: self.last_health_check.clone(),
            dependencies: self.dependencies.iter().map(|d| d.report()).collect(),
        }
    }
}

async fn next_worker_message(
    messages: &mut Option<mpsc::UnboundedReceiver<WorkerMessage>>,
) -> Option<WorkerMessage> {
    match messages.as_mut() {
        Some(messages) => messages.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_for_exit(
    exit: &mut Option<oneshot::Receiver<WorkerExit>>,
) -> std::result::Result<WorkerExit, oneshot::error::RecvError> {
    match exit.as_mut() {
        Some(exit) => exit.await,
        None => std::future::pending().await,
    }
}

fn unknown_exit(pid: u32) -> WorkerExit {
    WorkerExit {
        pid,
        exit_code: None,
        signal: None,
        timestamp: schema::current_timestamp(),
    }
}
