//! Managed Redis processes.
//!
//! A [`ManagedInstance`] owns one child process: it renders the launch
//! arguments, spawns the binary in a scratch directory, waits for the
//! readiness line and stops the process with a grace period. Every instance
//! is single-use; once stopped it cannot be started again.

pub(crate) mod log_forwarder;
pub(crate) mod process;

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::LaunchOptions;
use crate::error::{RedisError, Result, StopFailure, StopReport};
use crate::ports::{self, Endpoint};
use crate::readiness::{LinePattern, ReadyPredicate};

use self::log_forwarder::{
    ReadyWatch, Readiness, StreamKind, Transcript, WatchContext, spawn_line_watcher,
};
use self::process::{EXIT_SETTLE_TIMEOUT, RunningProcess, WorkDir};

/// Which Redis binary an instance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceKind {
    Server,
    Sentinel,
}

impl InstanceKind {
    /// Readiness rule used unless the instance is given another one.
    #[must_use]
    pub fn default_readiness(self) -> LinePattern {
        match self {
            Self::Server => LinePattern::server(),
            Self::Sentinel => LinePattern::sentinel(),
        }
    }

    /// Sentinel mode refuses to run without a writable config file.
    fn config_file(self) -> Option<&'static str> {
        match self {
            Self::Server => None,
            Self::Sentinel => Some("sentinel.conf"),
        }
    }
}

impl fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Server => "server",
            Self::Sentinel => "sentinel",
        })
    }
}

/// Lifecycle of a managed instance.
///
/// `NotStarted -> Starting -> Ready -> Stopped`, with `Starting -> Failed`
/// when the process exits, is killed after the startup timeout, or cannot be
/// spawned. `Stopped` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    NotStarted,
    Starting,
    Ready,
    Stopped,
    Failed,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotStarted => "not-started",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        })
    }
}

/// Common surface of servers and sentinels.
#[async_trait]
pub trait RedisInstance: Send {
    fn name(&self) -> &str;
    fn kind(&self) -> InstanceKind;
    fn state(&self) -> InstanceState;
    /// Port requested at build time; 0 means chosen at launch.
    fn declared_port(&self) -> u16;
    /// Port the process listens on once it is ready.
    fn effective_port(&self) -> Option<u16>;
    async fn start(&mut self) -> Result<()>;
    async fn stop(&mut self) -> Result<()>;
}

/// One Redis child process and its lifecycle.
pub struct ManagedInstance {
    name: String,
    instance_id: Uuid,
    kind: InstanceKind,
    executable: PathBuf,
    declared_port: u16,
    launch_port: Option<u16>,
    effective_port: Option<u16>,
    extra_args: Vec<String>,
    links: Vec<String>,
    options: LaunchOptions,
    readiness: Arc<dyn ReadyPredicate>,
    state: InstanceState,
    process: Option<RunningProcess>,
    workdir: Option<WorkDir>,
}

impl ManagedInstance {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: InstanceKind,
        executable: impl Into<PathBuf>,
        port: u16,
        options: LaunchOptions,
    ) -> Self {
        Self {
            name: name.into(),
            instance_id: Uuid::now_v7(),
            kind,
            executable: executable.into(),
            declared_port: port,
            launch_port: (port != 0).then_some(port),
            effective_port: None,
            extra_args: Vec::new(),
            links: Vec::new(),
            options,
            readiness: Arc::new(kind.default_readiness()),
            state: InstanceState::NotStarted,
            process: None,
            workdir: None,
        }
    }

    /// Replaces the readiness rule.
    #[must_use]
    pub fn with_readiness(mut self, predicate: impl ReadyPredicate) -> Self {
        self.readiness = Arc::new(predicate);
        self
    }

    /// Appends raw directives after the generated ones.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    #[must_use]
    pub fn kind(&self) -> InstanceKind {
        self.kind
    }

    #[must_use]
    pub fn state(&self) -> InstanceState {
        self.state
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.options.host
    }

    #[must_use]
    pub fn executable(&self) -> &std::path::Path {
        &self.executable
    }

    #[must_use]
    pub fn declared_port(&self) -> u16 {
        self.declared_port
    }

    /// Port the process listens on; known once it is ready.
    #[must_use]
    pub fn effective_port(&self) -> Option<u16> {
        self.effective_port
    }

    /// Port that will be (or was) passed on the command line.
    #[must_use]
    pub fn launch_port(&self) -> Option<u16> {
        self.launch_port
    }

    /// Effective endpoint, known once the instance is ready.
    #[must_use]
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.effective_port
            .map(|port| Endpoint::new(self.options.host.clone(), port))
    }

    /// Best-known endpoint: effective, then launch port, then declared port.
    #[must_use]
    pub fn planned_endpoint(&self) -> Endpoint {
        let port = self
            .effective_port
            .or(self.launch_port)
            .unwrap_or(self.declared_port);
        Endpoint::new(self.options.host.clone(), port)
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(RunningProcess::pid)
    }

    /// Launch directives in order, without the staged config file.
    ///
    /// `--port <p> --bind <host>`, then peer directives, then extra args.
    /// Sentinels get the path of their config file ahead of these.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let port = self.launch_port.unwrap_or(self.declared_port);
        let mut args = vec![
            "--port".to_owned(),
            port.to_string(),
            "--bind".to_owned(),
            self.options.host.clone(),
        ];
        args.extend(self.links.iter().cloned());
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Replaces the directives that wire this instance to its peers.
    pub(crate) fn set_links(&mut self, links: Vec<String>) {
        self.links = links;
    }

    /// Fixes the port for an instance declared with port 0.
    pub(crate) fn assign_launch_port(&mut self, port: u16) {
        if self.state == InstanceState::NotStarted {
            self.launch_port = Some(port);
        }
    }

    /// True when the port still has to be chosen before launch.
    pub(crate) fn needs_launch_port(&self) -> bool {
        self.state == InstanceState::NotStarted && self.launch_port.is_none()
    }

    /// Spawns the process and waits until it reports readiness.
    ///
    /// # Errors
    /// - `RedisError::InvalidState` unless the instance is `NotStarted`
    /// - `RedisError::StartupFailed` when the binary cannot be spawned or the
    ///   process exits before printing its readiness line
    /// - `RedisError::StartupTimeout` when readiness is not seen in time; the
    ///   process is killed
    /// - `RedisError::Io` when the scratch directory cannot be prepared
    pub async fn start(&mut self) -> Result<()> {
        if self.state != InstanceState::NotStarted {
            return Err(RedisError::InvalidState {
                instance: self.name.clone(),
                operation: "start",
                state: self.state,
            });
        }

        let (workdir, argv) = self.prepare_launch().await?;

        self.state = InstanceState::Starting;
        tracing::debug!(
            instance = %self.name,
            instance_id = %self.instance_id,
            kind = %self.kind,
            executable = %self.executable.display(),
            args = ?argv,
            "spawning redis instance"
        );

        let launch = match self.spawn(&argv, &workdir) {
            Ok(launch) => launch,
            Err(e) => {
                self.state = InstanceState::Failed;
                return Err(RedisError::StartupFailed {
                    instance: self.name.clone(),
                    reason: format!("failed to spawn {}: {e}", self.executable.display()),
                    output: Vec::new(),
                });
            }
        };

        self.await_readiness(launch, workdir).await
    }

    /// Fixes the port, stages the scratch directory and renders the argv.
    async fn prepare_launch(&mut self) -> Result<(WorkDir, Vec<String>)> {
        if self.launch_port.is_none() {
            let reserved = ports::reserve_ephemeral(&self.options.host, 1)?;
            self.launch_port = reserved.first().copied();
        }

        let explicit_dir = self
            .options
            .working_dir
            .as_ref()
            .map(|root| root.join(&self.name));
        let workdir = WorkDir::prepare(explicit_dir.as_deref(), &self.name)?;

        let mut argv = Vec::new();
        if let Some(file) = self.kind.config_file() {
            let path = workdir.path().join(file);
            tokio::fs::write(&path, b"").await?;
            argv.push(path.display().to_string());
        }
        argv.extend(self.args());
        Ok((workdir, argv))
    }

    fn spawn(&self, argv: &[String], workdir: &WorkDir) -> std::io::Result<Launch> {
        let mut child = Command::new(&self.executable)
            .args(argv)
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let transcript = Arc::new(Transcript::new(self.options.output_capture_lines));
        let cancel = CancellationToken::new();
        let ctx = WatchContext {
            instance: self.name.clone(),
            instance_id: self.instance_id,
            transcript: Arc::clone(&transcript),
            cancel: cancel.clone(),
        };

        let (ready_tx, ready) = oneshot::channel();
        let watch = ReadyWatch::new(Arc::clone(&self.readiness), ready_tx);
        let stdout_watcher = child.stdout.take().map(|stdout| {
            spawn_line_watcher(stdout, ctx.clone(), StreamKind::Stdout, Some(watch))
        });
        let stderr_forwarder = child
            .stderr
            .take()
            .map(|stderr| spawn_line_watcher(stderr, ctx, StreamKind::Stderr, None));

        Ok(Launch {
            process: RunningProcess {
                child,
                stdout_watcher,
                stderr_forwarder,
                cancel,
                instance: self.name.clone(),
                instance_id: self.instance_id,
            },
            transcript,
            ready,
        })
    }

    async fn await_readiness(&mut self, launch: Launch, workdir: WorkDir) -> Result<()> {
        let Launch {
            process,
            transcript,
            ready,
        } = launch;
        let pid = process.pid();
        let timeout = self.options.startup_timeout;

        match tokio::time::timeout(timeout, ready).await {
            Ok(Ok(Readiness::Ready { announced_port })) => {
                // A fixed declared port is authoritative; only port 0 is discovered.
                let effective = if self.declared_port == 0 {
                    announced_port
                        .or(self.launch_port)
                        .unwrap_or(self.declared_port)
                } else {
                    self.declared_port
                };
                self.effective_port = Some(effective);
                self.process = Some(process);
                self.workdir = Some(workdir);
                self.state = InstanceState::Ready;
                tracing::info!(
                    instance = %self.name,
                    instance_id = %self.instance_id,
                    kind = %self.kind,
                    pid = ?pid,
                    port = effective,
                    "redis instance ready"
                );
                Ok(())
            }
            Ok(Ok(Readiness::Closed) | Err(_)) => {
                let status = process.abort(EXIT_SETTLE_TIMEOUT).await;
                self.state = InstanceState::Failed;
                let reason = match status {
                    Some(status) => format!("process exited before becoming ready ({status})"),
                    None => "output closed before the readiness line; process killed".to_owned(),
                };
                tracing::warn!(
                    instance = %self.name,
                    instance_id = %self.instance_id,
                    pid = ?pid,
                    reason = %reason,
                    "redis instance failed to start"
                );
                Err(RedisError::StartupFailed {
                    instance: self.name.clone(),
                    reason,
                    output: transcript.snapshot(),
                })
            }
            Err(_) => {
                process.abort(Duration::ZERO).await;
                self.state = InstanceState::Failed;
                tracing::warn!(
                    instance = %self.name,
                    instance_id = %self.instance_id,
                    pid = ?pid,
                    timeout = ?timeout,
                    "redis instance did not become ready, killed"
                );
                Err(RedisError::StartupTimeout {
                    instance: self.name.clone(),
                    timeout,
                    output: transcript.snapshot(),
                })
            }
        }
    }

    /// Terminates the process: SIGTERM, then a forced kill after the grace
    /// period. Idempotent; stopping a never-started instance marks it stopped.
    ///
    /// # Errors
    /// Returns `RedisError::StopFailed` when the process could not be killed.
    pub async fn stop(&mut self) -> Result<()> {
        match self.state {
            InstanceState::Stopped | InstanceState::Failed => return Ok(()),
            InstanceState::NotStarted => {
                self.state = InstanceState::Stopped;
                return Ok(());
            }
            InstanceState::Starting | InstanceState::Ready => {}
        }

        let outcome = match self.process.take() {
            Some(process) => process.shutdown(self.options.stop_grace).await,
            None => Ok(()),
        };
        self.workdir = None;
        self.state = InstanceState::Stopped;

        match outcome {
            Ok(()) => {
                tracing::info!(
                    instance = %self.name,
                    instance_id = %self.instance_id,
                    "redis instance stopped"
                );
                Ok(())
            }
            Err(reason) => Err(RedisError::StopFailed(StopReport {
                failures: vec![StopFailure {
                    instance: self.name.clone(),
                    reason,
                }],
            })),
        }
    }
}

/// A freshly spawned process whose readiness is still pending.
struct Launch {
    process: RunningProcess,
    transcript: Arc<Transcript>,
    ready: oneshot::Receiver<Readiness>,
}

impl fmt::Debug for ManagedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedInstance")
            .field("name", &self.name)
            .field("instance_id", &self.instance_id)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("declared_port", &self.declared_port)
            .field("effective_port", &self.effective_port)
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RedisInstance for ManagedInstance {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> InstanceKind {
        self.kind
    }

    fn state(&self) -> InstanceState {
        self.state
    }

    fn declared_port(&self) -> u16 {
        self.declared_port
    }

    fn effective_port(&self) -> Option<u16> {
        self.effective_port
    }

    async fn start(&mut self) -> Result<()> {
        ManagedInstance::start(self).await
    }

    async fn stop(&mut self) -> Result<()> {
        ManagedInstance::stop(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(port: u16) -> ManagedInstance {
        ManagedInstance::new(
            "m1",
            InstanceKind::Server,
            "/nonexistent/redis-server",
            port,
            LaunchOptions::default(),
        )
    }

    #[test]
    fn test_server_args_template() {
        assert_eq!(
            server(6379).args(),
            vec!["--port", "6379", "--bind", "127.0.0.1"]
        );
    }

    #[test]
    fn test_links_and_extra_args_follow_template() {
        let mut instance = server(6380).with_args(["--appendonly", "no"]);
        instance.set_links(vec![
            "--replicaof".to_owned(),
            "127.0.0.1".to_owned(),
            "6379".to_owned(),
        ]);
        assert_eq!(
            instance.args(),
            vec![
                "--port",
                "6380",
                "--bind",
                "127.0.0.1",
                "--replicaof",
                "127.0.0.1",
                "6379",
                "--appendonly",
                "no"
            ]
        );
    }

    #[test]
    fn test_ephemeral_port_assignment() {
        let mut instance = server(0);
        assert!(instance.needs_launch_port());
        assert_eq!(instance.args()[1], "0");

        instance.assign_launch_port(41000);
        assert!(!instance.needs_launch_port());
        assert_eq!(instance.declared_port(), 0);
        assert_eq!(instance.args()[1], "41000");
        assert_eq!(instance.planned_endpoint(), Endpoint::new("127.0.0.1", 41000));
    }

    #[tokio::test]
    async fn test_stop_before_start_marks_stopped() {
        let mut instance = server(6379);
        instance.stop().await.unwrap();
        assert_eq!(instance.state(), InstanceState::Stopped);
        instance.stop().await.unwrap();

        let err = instance.start().await.unwrap_err();
        assert!(matches!(
            err,
            RedisError::InvalidState {
                operation: "start",
                state: InstanceState::Stopped,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_executable_fails_startup() {
        let mut instance = server(6379);
        let err = instance.start().await.unwrap_err();
        assert!(matches!(err, RedisError::StartupFailed { .. }));
        assert_eq!(instance.state(), InstanceState::Failed);
        assert!(instance.effective_port().is_none());

        // Failed is terminal; stop is a no-op.
        instance.stop().await.unwrap();
        assert_eq!(instance.state(), InstanceState::Failed);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(InstanceKind::Sentinel.to_string(), "sentinel");
        assert_eq!(InstanceState::NotStarted.to_string(), "not-started");
    }
}
