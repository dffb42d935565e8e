//! Named collection of worker supervisors
//!
//! The [`SupervisorGroup`] owns the event bus every member publishes on and
//! the name → [`SupervisorHandle`] map. Callers only go through its methods;
//! the map lock is never held across an `.await`.

use crate::dependency::Dependency;
use crate::supervisor::{
    spawn_supervisor, spawn_supervisor_with_dependencies, ProcessAdapter, SupervisorConfig,
    SupervisorHandle, DEFAULT_HISTORY_CAPACITY,
};
use crate::{CoreError, Result};
use parking_lot::RwLock;
use schema::{SupervisionConfig, SupervisorEvent, WorkerSpec, WorkerState, WorkerStats};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Capacity of the group's event bus
pub const EVENT_BUS_CAPACITY: usize = 1024;

pub struct SupervisorGroup {
    supervision: Arc<SupervisionConfig>,
    process_adapter: Arc<dyn ProcessAdapter>,
    event_tx: broadcast::Sender<SupervisorEvent>,
    history_capacity: usize,
    members: RwLock<BTreeMap<String, SupervisorHandle>>,
}

impl std::fmt::Debug for SupervisorGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorGroup")
            .field("members", &self.names())
            .finish_non_exhaustive()
    }
}

impl SupervisorGroup {
    /// Create an empty group whose members default to `supervision`
    pub fn new(supervision: Arc<SupervisionConfig>, process_adapter: Arc<dyn ProcessAdapter>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            supervision,
            process_adapter,
            event_tx,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            members: RwLock::new(BTreeMap::new()),
        }
    }

    /// Capacity of each member dependency's result history
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Supervise a worker under the group's default configuration
    pub fn supervise(&self, spec: WorkerSpec) -> Result<SupervisorHandle> {
        let supervision = Arc::clone(&self.supervision);
        self.supervise_with(spec, supervision)
    }

    /// Supervise a worker with its own configuration
    ///
    /// The worker is registered in `Stopped`. Fails with
    /// [`CoreError::AlreadyExists`] if its id is taken.
    pub fn supervise_with(
        &self,
        spec: WorkerSpec,
        supervision: Arc<SupervisionConfig>,
    ) -> Result<SupervisorHandle> {
        self.insert(spec, supervision, spawn_supervisor)
    }

    /// Supervise a worker guarding already-built dependencies
    ///
    /// The dependencies replace the ones listed in `spec`.
    pub fn supervise_with_dependencies(
        &self,
        spec: WorkerSpec,
        supervision: Arc<SupervisionConfig>,
        dependencies: Vec<Arc<Dependency>>,
    ) -> Result<SupervisorHandle> {
        self.insert(spec, supervision, |config| {
            spawn_supervisor_with_dependencies(config, dependencies)
        })
    }

    fn insert(
        &self,
        spec: WorkerSpec,
        supervision: Arc<SupervisionConfig>,
        spawn: impl FnOnce(SupervisorConfig) -> SupervisorHandle,
    ) -> Result<SupervisorHandle> {
        let mut members = self.members.write();
        if members.contains_key(&spec.id) {
            warn!("Rejecting duplicate worker '{}'", spec.id);
            return Err(CoreError::AlreadyExists(spec.id));
        }

        let id = spec.id.clone();
        let handle = spawn(SupervisorConfig {
            spec,
            supervision,
            process_adapter: Arc::clone(&self.process_adapter),
            event_tx: self.event_tx.clone(),
            history_capacity: self.history_capacity,
        });
        members.insert(id.clone(), handle.clone());
        info!("Worker '{}' added to group ({} members)", id, members.len());
        Ok(handle)
    }

    /// Stop a worker, end its supervisor and forget it
    pub async fn remove(&self, name: &str) -> Result<()> {
        let handle = self
            .members
            .write()
            .remove(name)
            .ok_or_else(|| CoreError::NotFound(name.to_string()))?;
        handle.shutdown().await?;
        info!("Worker '{}' removed from group", name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<SupervisorHandle> {
        self.members.read().get(name).cloned()
    }

    fn handle(&self, name: &str) -> Result<SupervisorHandle> {
        self.get(name)
            .ok_or_else(|| CoreError::NotFound(name.to_string()))
    }

    fn handles(&self) -> Vec<SupervisorHandle> {
        self.members.read().values().cloned().collect()
    }

    /// Member names in order
    pub fn names(&self) -> Vec<String> {
        self.members.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    pub async fn start(&self, name: &str) -> Result<()> {
        self.handle(name)?.start().await
    }

    /// Start every member, concurrently
    ///
    /// Every member is attempted; the first failure, by name order, is returned.
    pub async fn start_all(&self) -> Result<()> {
        let mut set = JoinSet::new();
        for handle in self.handles() {
            set.spawn(async move {
                let result = handle.start().await;
                (handle.id().to_string(), result)
            });
        }

        let mut failures = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(e))) => {
                    error!("Failed to start worker '{}': {}", name, e);
                    failures.insert(name, e);
                }
                Err(e) => error!("Start task panicked: {}", e),
            }
        }
        match failures.into_values().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        self.handle(name)?.stop().await
    }

    /// Stop every member concurrently and wait for all of them
    pub async fn stop_all(&self) {
        let handles = self.handles();
        debug!("Stopping {} workers", handles.len());

        let mut set = JoinSet::new();
        for handle in handles {
            set.spawn(async move {
                if let Err(e) = handle.stop().await {
                    warn!("Stopping worker '{}' failed: {}", handle.id(), e);
                }
            });
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!("Stop task panicked: {}", e);
            }
        }
        info!("All workers stopped");
    }

    /// Stop every member and end their supervisors
    pub async fn shutdown(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.members.write())
            .into_values()
            .collect();

        let mut set = JoinSet::new();
        for handle in handles {
            set.spawn(async move {
                if let Err(e) = handle.shutdown().await {
                    debug!("Supervisor for '{}' already gone: {}", handle.id(), e);
                }
            });
        }
        while set.join_next().await.is_some() {}
        info!("Supervisor group shut down");
    }

    /// Snapshot of every member's statistics
    ///
    /// Members whose supervisor has gone away are left out.
    pub async fn status(&self) -> BTreeMap<String, WorkerStats> {
        let mut set = JoinSet::new();
        for handle in self.handles() {
            set.spawn(async move { (handle.id().to_string(), handle.status().await) });
        }

        let mut stats = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, Ok(s))) => {
                    stats.insert(name, s);
                }
                Ok((name, Err(e))) => debug!("No status for worker '{}': {}", name, e),
                Err(e) => error!("Status task panicked: {}", e),
            }
        }
        stats
    }

    /// Current state of every member, without querying the supervisors
    pub fn states(&self) -> BTreeMap<String, WorkerState> {
        self.members
            .read()
            .iter()
            .map(|(name, handle)| (name.clone(), handle.current_state()))
            .collect()
    }

    /// Subscribe to every member's events
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.event_tx.subscribe()
    }

    /// Sender side of the event bus, for publishers outside the group
    pub fn event_sender(&self) -> broadcast::Sender<SupervisorEvent> {
        self.event_tx.clone()
    }
}
