//! Unix process management with safe spawn/kill using process groups
//!
//! Every worker is started in a new session via `setsid()`, which makes it
//! the leader of its own process group. Signals are then sent to the group so
//! that helpers the worker forked are terminated along with it.
//!
//! The worker's stdin and stdout are piped and carry the IPC protocol; stderr
//! is inherited so worker diagnostics go wherever the supervisor's own go.

// Allow unsafe code for this module since process management requires libc::setsid() calls
#![allow(unsafe_code)]

use crate::{CoreError, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use schema::{WorkerExit, WorkerSpec};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, error};

/// A child process leading its own process group
#[derive(Debug)]
pub struct ChildProcess {
    pid: Pid,
    child: Child,
}

impl ChildProcess {
    /// Get the process ID
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Get the process group ID (same as PID for session leaders)
    pub fn pgid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Wait for the process to exit and return its exit status
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.child.wait().await.map_err(|e| {
            CoreError::ProcessWait(format!("Failed to wait for process {}: {}", self.pid, e))
        })
    }

    /// Take the stdin handle (supervisor → worker messages)
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take the stdout handle (worker → supervisor messages)
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }
}

/// Spawn the worker described by `spec` in its own process group
///
/// ```rust,no_run
/// use schema::WorkerSpec;
/// use warden_core::process::unix::spawn;
///
/// # async fn example() -> warden_core::Result<()> {
/// let mut spec = WorkerSpec::new("echo", "echo");
/// spec.args = vec!["hello".to_string()];
/// let child = spawn(&spec)?;
/// println!("Spawned process with PID: {}", child.pid());
/// # Ok(())
/// # }
/// ```
pub fn spawn(spec: &WorkerSpec) -> Result<ChildProcess> {
    debug!("Spawning process: {} {:?}", spec.command, spec.args);

    let mut command = Command::new(&spec.command);
    command.args(&spec.args);
    command.envs(&spec.environment);
    if let Some(dir) = &spec.working_directory {
        command.current_dir(dir);
    }
    command.stdin(Stdio::piped());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::inherit());

    // Safety: setsid() is async-signal-safe and appropriate for use in pre_exec
    #[deny(unsafe_op_in_unsafe_fn)]
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = command.spawn().map_err(|e| {
        error!("Failed to spawn process '{}': {}", spec.command, e);
        CoreError::ProcessSpawn(format!("Failed to spawn '{}': {}", spec.command, e))
    })?;

    let raw_pid = child
        .id()
        .ok_or_else(|| CoreError::ProcessSpawn("Spawned child did not have a PID".to_string()))?;
    let pid = Pid::from_raw(raw_pid as i32);
    debug!("Spawned process {} in new process group", pid);

    Ok(ChildProcess { pid, child })
}

/// Send `signal` to the process group led by `pgid`
///
/// `ESRCH` and `EPERM` are treated as success: the group has already exited
/// (or its id was reused by a process we may not signal).
pub fn signal_group(pgid: u32, signal: Signal) -> Result<()> {
    let target = Pid::from_raw(pgid as i32);
    match killpg(target, signal) {
        Ok(()) => {
            debug!("Sent {} to process group {}", signal, pgid);
            Ok(())
        }
        Err(nix::errno::Errno::ESRCH) | Err(nix::errno::Errno::EPERM) => {
            debug!("Process group {} already exited", pgid);
            Ok(())
        }
        Err(e) => {
            error!("Failed to send {} to process group {}: {}", signal, pgid, e);
            Err(CoreError::ProcessSignal(format!(
                "Failed to send {} to process group {}: {}",
                signal, pgid, e
            )))
        }
    }
}

/// Send SIGTERM to the process group
pub fn signal_term_group(pgid: u32) -> Result<()> {
    signal_group(pgid, Signal::SIGTERM)
}

/// Send SIGKILL to the process group
pub fn signal_kill_group(pgid: u32) -> Result<()> {
    signal_group(pgid, Signal::SIGKILL)
}

/// Convert an exit status into the schema exit record
pub fn worker_exit(pid: u32, status: ExitStatus) -> WorkerExit {
    WorkerExit {
        pid,
        exit_code: status.code(),
        signal: status.signal(),
        timestamp: schema::current_timestamp(),
    }
}
