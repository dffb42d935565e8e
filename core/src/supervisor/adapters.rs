//! Process adapters for abstracting process management
//!
//! The supervisor never touches an OS process directly. It asks a
//! [`ProcessAdapter`] to spawn a worker and gets back a [`SpawnedWorker`]:
//! a shared handle for sending protocol messages and force-killing, a stream
//! of messages the worker sent, and a one-shot that resolves when it exits.

use crate::{CoreError, Result};
use async_trait::async_trait;
use schema::{WorkerExit, WorkerMessage, WorkerSpec};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Signal number reported for a force-killed worker
pub const SIGKILL_NUMBER: i32 = 9;

/// Trait for spawning worker processes
#[async_trait]
pub trait ProcessAdapter: Send + Sync {
    /// Spawn a new worker according to its specification
    async fn spawn(&self, spec: &WorkerSpec) -> Result<SpawnedWorker>;
}

/// Control surface of a running worker
#[async_trait]
pub trait WorkerProcess: Send + Sync {
    /// Get the process ID
    fn pid(&self) -> u32;

    /// Deliver a protocol message to the worker
    async fn send(&self, message: WorkerMessage) -> Result<()>;

    /// Kill the worker forcefully (SIGKILL)
    async fn kill(&self) -> Result<()>;
}

/// Everything the supervisor holds for one spawned worker
pub struct SpawnedWorker {
    pub process: Arc<dyn WorkerProcess>,
    /// Messages received from the worker; closes when its output ends
    pub messages: mpsc::UnboundedReceiver<WorkerMessage>,
    /// Resolves once with the exit information
    pub exit: oneshot::Receiver<WorkerExit>,
}

impl std::fmt::Debug for SpawnedWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedWorker")
            .field("pid", &self.process.pid())
            .finish_non_exhaustive()
    }
}

/// Adapter that runs workers as Unix processes speaking JSON lines on stdin/stdout
#[cfg(unix)]
#[derive(Copy, Clone, Debug, Default)]
pub struct UnixProcessAdapter;

#[cfg(unix)]
impl UnixProcessAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
#[async_trait]
impl ProcessAdapter for UnixProcessAdapter {
    async fn spawn(&self, spec: &WorkerSpec) -> Result<SpawnedWorker> {
        use crate::process::unix;
        use tokio::io::BufReader;
        use tracing::{error, warn};

        let mut child = unix::spawn(spec)?;
        let pid = child.pid();
        let stdin = child
            .take_stdin()
            .ok_or_else(|| CoreError::ProcessSpawn("worker stdin was not piped".to_string()))?;
        let stdout = child
            .take_stdout()
            .ok_or_else(|| CoreError::ProcessSpawn("worker stdout was not piped".to_string()))?;

        let (message_tx, messages) = mpsc::unbounded_channel();
        let worker_id = spec.id.clone();
        tokio::spawn(async move {
            let mut reader = ipc::FrameReader::new(BufReader::new(stdout));
            loop {
                match reader.next_message::<WorkerMessage>().await {
                    Ok(Some(message)) => {
                        if message_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    // Lines that are not protocol messages are worker chatter
                    Err(ipc::IpcError::DeserializationFailed(e)) => {
                        debug!("Ignoring non-protocol output from '{}': {}", worker_id, e);
                    }
                    Err(e) => {
                        warn!("Stopped reading output of '{}': {}", worker_id, e);
                        break;
                    }
                }
            }
        });

        let (exit_tx, exit) = oneshot::channel();
        tokio::spawn(async move {
            let exit_info = match child.wait().await {
                Ok(status) => unix::worker_exit(pid, status),
                Err(e) => {
                    error!("{}", e);
                    WorkerExit {
                        pid,
                        exit_code: None,
                        signal: None,
                        timestamp: schema::current_timestamp(),
                    }
                }
            };
            let _ = exit_tx.send(exit_info);
        });

        Ok(SpawnedWorker {
            process: Arc::new(UnixWorkerProcess {
                pid,
                stdin: tokio::sync::Mutex::new(stdin),
            }),
            messages,
            exit,
        })
    }
}

#[cfg(unix)]
struct UnixWorkerProcess {
    pid: u32,
    stdin: tokio::sync::Mutex<tokio::process::ChildStdin>,
}

#[cfg(unix)]
#[async_trait]
impl WorkerProcess for UnixWorkerProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn send(&self, message: WorkerMessage) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        ipc::write_message(&mut *stdin, &message).await?;
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        crate::process::unix::signal_kill_group(self.pid)
    }
}

/// Scripted behaviour of one mock worker
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Exit on its own after this long; `None` runs until stopped or killed
    pub exit_after: Option<Duration>,
    /// Exit code reported for a self-initiated exit
    pub exit_code: Option<i32>,
    /// Signal reported for a self-initiated exit
    pub signal: Option<i32>,
    /// Reply to `health_check` requests
    pub answers_health_checks: bool,
    /// Delay before each health check reply
    pub health_response_delay: Duration,
    /// Send `ready` right after spawning
    pub sends_ready: bool,
    /// Exit with code 0 on `shutdown`
    pub honours_shutdown: bool,
    /// Make `spawn` itself fail
    pub fail_spawn: bool,
    /// Take messages off its input; when false every `send` blocks, like a full pipe
    pub reads_input: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            exit_after: None,
            exit_code: Some(0),
            signal: None,
            answers_health_checks: true,
            health_response_delay: Duration::ZERO,
            sends_ready: false,
            honours_shutdown: true,
            fail_spawn: false,
            reads_input: true,
        }
    }
}

impl MockBehavior {
    /// A healthy worker that runs until stopped
    pub fn running() -> Self {
        Self::default()
    }

    /// A worker that exits with `exit_code` after `after`
    pub fn exits_after(after: Duration, exit_code: i32) -> Self {
        Self {
            exit_after: Some(after),
            exit_code: Some(exit_code),
            ..Self::default()
        }
    }

    /// A worker whose spawn fails
    pub fn spawn_failure() -> Self {
        Self {
            fail_spawn: true,
            ..Self::default()
        }
    }

    pub fn ignoring_health_checks(mut self) -> Self {
        self.answers_health_checks = false;
        self
    }

    pub fn with_health_delay(mut self, delay: Duration) -> Self {
        self.health_response_delay = delay;
        self
    }

    pub fn ready_signal(mut self) -> Self {
        self.sends_ready = true;
        self
    }

    pub fn ignoring_shutdown(mut self) -> Self {
        self.honours_shutdown = false;
        self
    }

    pub fn not_reading_input(mut self) -> Self {
        self.reads_input = false;
        self
    }
}

#[derive(Debug)]
struct MockState {
    script: parking_lot::Mutex<VecDeque<MockBehavior>>,
    fallback: MockBehavior,
    spawn_count: AtomicU32,
    next_pid: AtomicU32,
    sent: parking_lot::Mutex<Vec<(u32, WorkerMessage)>>,
}

/// In-process stand-in for real workers
///
/// Each spawn consumes the next scripted [`MockBehavior`], falling back to a
/// fixed behaviour once the script is exhausted.
#[derive(Debug, Clone)]
pub struct MockProcessAdapter {
    state: Arc<MockState>,
}

impl MockProcessAdapter {
    /// Every spawned worker behaves like `fallback`
    pub fn new(fallback: MockBehavior) -> Self {
        Self::with_script(Vec::new(), fallback)
    }

    /// Spawned workers follow `script` in order, then `fallback`
    pub fn with_script(script: Vec<MockBehavior>, fallback: MockBehavior) -> Self {
        Self {
            state: Arc::new(MockState {
                script: parking_lot::Mutex::new(script.into()),
                fallback,
                spawn_count: AtomicU32::new(0),
                next_pid: AtomicU32::new(1000),
                sent: parking_lot::Mutex::new(Vec::new()),
            }),
        }
    }

    /// Append a behaviour to the script
    pub fn push_behavior(&self, behavior: MockBehavior) {
        self.state.script.lock().push_back(behavior);
    }

    /// Number of spawn attempts, including failed ones
    pub fn spawn_count(&self) -> u32 {
        self.state.spawn_count.load(Ordering::SeqCst)
    }

    /// Every message sent to any mock worker, with its pid
    pub fn sent_messages(&self) -> Vec<(u32, WorkerMessage)> {
        self.state.sent.lock().clone()
    }
}

impl Default for MockProcessAdapter {
    fn default() -> Self {
        Self::new(MockBehavior::default())
    }
}

#[async_trait]
impl ProcessAdapter for MockProcessAdapter {
    async fn spawn(&self, spec: &WorkerSpec) -> Result<SpawnedWorker> {
        self.state.spawn_count.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .state
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.state.fallback.clone());
        if behavior.fail_spawn {
            return Err(CoreError::ProcessSpawn(format!(
                "mock spawn failure for '{}'",
                spec.id
            )));
        }

        let pid = self.state.next_pid.fetch_add(1, Ordering::SeqCst);
        debug!("Spawning mock worker {} for '{}'", pid, spec.id);

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (message_tx, messages) = mpsc::unbounded_channel();
        let (exit_tx, exit) = oneshot::channel();
        let killed = CancellationToken::new();
        let reads_input = behavior.reads_input;

        tokio::spawn(run_mock_worker(
            pid,
            behavior,
            inbox_rx,
            message_tx,
            exit_tx,
            killed.clone(),
        ));

        Ok(SpawnedWorker {
            process: Arc::new(MockWorkerProcess {
                pid,
                inbox: inbox_tx,
                reads_input,
                killed,
                state: Arc::clone(&self.state),
            }),
            messages,
            exit,
        })
    }
}

async fn run_mock_worker(
    pid: u32,
    behavior: MockBehavior,
    mut inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    outbox: mpsc::UnboundedSender<WorkerMessage>,
    exit_tx: oneshot::Sender<WorkerExit>,
    killed: CancellationToken,
) {
    if behavior.sends_ready {
        let _ = outbox.send(WorkerMessage::Ready);
    }

    let self_exit = async {
        match behavior.exit_after {
            Some(after) => tokio::time::sleep(after).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(self_exit);

    let mut inbox_open = true;
    let (exit_code, signal) = loop {
        tokio::select! {
            _ = killed.cancelled() => break (None, Some(SIGKILL_NUMBER)),
            _ = &mut self_exit => break (behavior.exit_code, behavior.signal),
            message = inbox.recv(), if inbox_open => match message {
                Some(WorkerMessage::HealthCheck) if behavior.answers_health_checks => {
                    let delay = behavior.health_response_delay;
                    let outbox = outbox.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = outbox.send(WorkerMessage::health_check_response());
                    });
                }
                Some(WorkerMessage::Shutdown) if behavior.honours_shutdown => break (Some(0), None),
                Some(_) => {}
                None => inbox_open = false,
            },
        }
    };

    let _ = exit_tx.send(WorkerExit {
        pid,
        exit_code,
        signal,
        timestamp: schema::current_timestamp(),
    });
}

struct MockWorkerProcess {
    pid: u32,
    inbox: mpsc::UnboundedSender<WorkerMessage>,
    reads_input: bool,
    killed: CancellationToken,
    state: Arc<MockState>,
}

#[async_trait]
impl WorkerProcess for MockWorkerProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn send(&self, message: WorkerMessage) -> Result<()> {
        self.state.sent.lock().push((self.pid, message.clone()));
        if !self.reads_input {
            std::future::pending::<()>().await;
        }
        self.inbox.send(message).map_err(|_| {
            CoreError::Ipc(ipc::IpcError::SendFailed(format!(
                "mock worker {} has exited",
                self.pid
            )))
        })
    }

    async fn kill(&self) -> Result<()> {
        debug!("Killing mock worker {}", self.pid);
        self.killed.cancel();
        Ok(())
    }
}
