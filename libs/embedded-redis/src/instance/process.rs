//! Child process handle: graceful stop, forced abort, output task draining.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Maximum time to wait for an output task to drain after its process is gone.
const FORWARDER_DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

/// How long a process whose output closed early gets to report its own exit.
pub const EXIT_SETTLE_TIMEOUT: Duration = Duration::from_millis(250);

/// Send graceful termination signal to a child process.
///
/// # Returns
/// - `true` if signal was successfully sent
/// - `false` if the process has no PID (already reaped), the PID does not fit
///   in an `i32`, or signal delivery fails
///
/// Redis handles SIGTERM by closing its listeners and exiting.
#[cfg(unix)]
fn send_terminate_signal(child: &Child) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };

    let Ok(pid_i32) = i32::try_from(pid) else {
        tracing::warn!(
            pid = pid,
            "Failed to convert PID to i32, cannot send SIGTERM (PID exceeds i32::MAX: {})",
            i32::MAX
        );
        return false;
    };

    kill(Pid::from_raw(pid_i32), Signal::SIGTERM).is_ok()
}

/// Always `false` off Unix; the caller goes straight to a forced kill.
#[cfg(not(unix))]
fn send_terminate_signal(_child: &Child) -> bool {
    false
}

/// Wait for an output task to finish with timeout.
async fn wait_forwarder(handle: Option<JoinHandle<()>>) {
    if let Some(h) = handle {
        let _ = tokio::time::timeout(FORWARDER_DRAIN_TIMEOUT, h).await;
    }
}

/// Scratch directory a process runs in.
#[derive(Debug)]
pub enum WorkDir {
    /// Created for this launch, removed when dropped.
    Temp(TempDir),
    /// Caller-provided; left in place.
    Fixed(PathBuf),
}

impl WorkDir {
    pub fn prepare(explicit: Option<&Path>, instance: &str) -> std::io::Result<Self> {
        if let Some(dir) = explicit {
            std::fs::create_dir_all(dir)?;
            return Ok(Self::Fixed(dir.to_path_buf()));
        }
        let dir = tempfile::Builder::new()
            .prefix(&format!("redis-{instance}-"))
            .tempdir()?;
        Ok(Self::Temp(dir))
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Temp(dir) => dir.path(),
            Self::Fixed(path) => path,
        }
    }
}

/// A spawned Redis process together with its output tasks.
pub struct RunningProcess {
    pub child: Child,
    pub stdout_watcher: Option<JoinHandle<()>>,
    pub stderr_forwarder: Option<JoinHandle<()>>,
    pub cancel: CancellationToken,
    pub instance: String,
    pub instance_id: Uuid,
}

impl RunningProcess {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Stop the process with graceful termination and timeout.
    ///
    /// 1. Sends SIGTERM (Unix) via `send_terminate_signal`
    /// 2. Waits for process exit within `grace` period
    /// 3. On timeout: force kills the process
    ///
    /// Output tasks are drained in every case. The error carries a reason
    /// when the process could neither be awaited nor killed.
    pub async fn shutdown(mut self, grace: Duration) -> Result<(), String> {
        let pid = self.child.id();
        let sent = send_terminate_signal(&self.child);

        tracing::debug!(
            instance = %self.instance,
            instance_id = %self.instance_id,
            pid = ?pid,
            graceful = sent,
            "stop: sent termination signal"
        );

        let outcome = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(
                    instance = %self.instance,
                    instance_id = %self.instance_id,
                    status = ?status,
                    "stop: process exited gracefully"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    instance = %self.instance,
                    instance_id = %self.instance_id,
                    error = %e,
                    "stop: failed to wait for process"
                );
                self.child
                    .kill()
                    .await
                    .map_err(|kill_err| format!("wait failed: {e}; kill failed: {kill_err}"))
            }
            Err(_) => {
                tracing::debug!(
                    instance = %self.instance,
                    instance_id = %self.instance_id,
                    "stop: grace period expired, force killing"
                );
                self.child.kill().await.map_err(|e| {
                    tracing::warn!(
                        instance = %self.instance,
                        instance_id = %self.instance_id,
                        error = %e,
                        "stop: failed to force kill"
                    );
                    format!("kill failed: {e}")
                })
            }
        };

        self.drain().await;
        outcome
    }

    /// Ends a process that never became ready.
    ///
    /// Returns the exit status only if the process exited by itself within
    /// `settle`; otherwise it is killed and `None` is returned.
    pub async fn abort(mut self, settle: Duration) -> Option<ExitStatus> {
        let exited = match tokio::time::timeout(settle, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                tracing::warn!(
                    instance = %self.instance,
                    instance_id = %self.instance_id,
                    error = %e,
                    "abort: failed to wait for process"
                );
                None
            }
            Err(_) => None,
        };
        if exited.is_none()
            && let Err(e) = self.child.kill().await
        {
            tracing::warn!(
                instance = %self.instance,
                instance_id = %self.instance_id,
                error = %e,
                "abort: failed to kill process"
            );
        }
        self.drain().await;
        exited
    }

    /// Lets the output tasks read up to EOF, then cancels any that linger
    /// (a grandchild may still hold the pipe).
    async fn drain(&mut self) {
        wait_forwarder(self.stdout_watcher.take()).await;
        wait_forwarder(self.stderr_forwarder.take()).await;
        self.cancel.cancel();
    }
}
