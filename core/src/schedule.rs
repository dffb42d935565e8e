//! Cancellable one-shot timers that deliver a message to an actor
//!
//! A [`TimerSlot`] holds at most one pending [`ScheduledTask`]. Every
//! scheduled message carries the [`TimerId`] it was created with; the actor
//! passes that id back to [`TimerSlot::fire`], which only accepts the id of
//! the task currently in the slot. A message that was already in flight when
//! the slot was cancelled or rescheduled is therefore rejected.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Identifier of a scheduled task within its slot
pub type TimerId = u64;

/// A delayed message send that can be cancelled
#[derive(Debug)]
pub struct ScheduledTask {
    id: TimerId,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Send `message` on `tx` after `delay` unless cancelled first
    pub fn spawn<M>(id: TimerId, delay: Duration, tx: mpsc::UnboundedSender<M>, message: M) -> Self
    where
        M: Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {
                    trace!("scheduled task {} cancelled", id);
                }
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(message);
                }
            }
        });
        Self { id, token, handle }
    }

    /// Identifier of this task
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Whether the timer task has completed (fired or cancelled)
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the task; a message not yet sent never will be
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Holder for the single pending timer of one purpose
#[derive(Debug, Default)]
pub struct TimerSlot {
    next_id: TimerId,
    current: Option<ScheduledTask>,
}

impl TimerSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any pending task with a new one built from its id
    pub fn schedule<M, F>(&mut self, delay: Duration, tx: &mpsc::UnboundedSender<M>, make: F) -> TimerId
    where
        M: Send + 'static,
        F: FnOnce(TimerId) -> M,
    {
        self.cancel();
        self.next_id = self.next_id.wrapping_add(1);
        let id = self.next_id;
        self.current = Some(ScheduledTask::spawn(id, delay, tx.clone(), make(id)));
        id
    }

    /// Cancel the pending task, returning whether there was one
    pub fn cancel(&mut self) -> bool {
        match self.current.take() {
            Some(task) => {
                task.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a task is pending
    pub fn is_pending(&self) -> bool {
        self.current.is_some()
    }

    /// Consume a fired message; true only if `id` is the pending task
    pub fn fire(&mut self, id: TimerId) -> bool {
        match &self.current {
            Some(task) if task.id() == id => {
                self.current = None;
                true
            }
            _ => false,
        }
    }
}
