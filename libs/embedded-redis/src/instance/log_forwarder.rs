//! Output draining for Redis child processes
//!
//! Each spawned process gets one task per output stream. The task forwards
//! every line to the parent's tracing system, keeps the early lines for
//! diagnostics and, on stdout, watches for the readiness line. Reading goes on
//! after readiness until the stream closes so the child never blocks on a full
//! pipe.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use uuid::Uuid;

use crate::readiness::ReadyPredicate;

/// Stream type identifier for logging
#[derive(Debug, Clone, Copy)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// What the stdout watcher observed before readiness was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready { announced_port: Option<u16> },
    Closed,
}

/// Bounded record of the lines a process printed before it became ready.
#[derive(Debug)]
pub struct Transcript {
    lines: Mutex<VecDeque<String>>,
    limit: usize,
}

impl Transcript {
    pub fn new(limit: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::new()),
            limit,
        }
    }

    fn push(&self, line: &str) {
        if self.limit == 0 {
            return;
        }
        let mut lines = self.lines.lock();
        if lines.len() == self.limit {
            lines.pop_front();
        }
        lines.push_back(line.to_owned());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }
}

/// Identity of the process whose output is being drained.
#[derive(Clone)]
pub struct WatchContext {
    pub instance: String,
    pub instance_id: Uuid,
    pub transcript: Arc<Transcript>,
    pub cancel: CancellationToken,
}

/// Pending readiness decision carried by the stdout task.
pub struct ReadyWatch {
    predicate: Arc<dyn ReadyPredicate>,
    respond_to: oneshot::Sender<Readiness>,
    announced_port: Option<u16>,
}

impl ReadyWatch {
    pub fn new(
        predicate: Arc<dyn ReadyPredicate>,
        respond_to: oneshot::Sender<Readiness>,
    ) -> Self {
        Self {
            predicate,
            respond_to,
            announced_port: None,
        }
    }

    /// Feeds one line; returns the watch back while still undecided.
    fn observe(mut self, line: &str) -> Option<Self> {
        if let Some(port) = self.predicate.announced_port(line) {
            self.announced_port = Some(port);
        }
        if self.predicate.is_ready(line) {
            respond(
                self.respond_to,
                Readiness::Ready {
                    announced_port: self.announced_port,
                },
            );
            return None;
        }
        Some(self)
    }

    fn close(self) {
        respond(self.respond_to, Readiness::Closed);
    }
}

fn respond(to: oneshot::Sender<Readiness>, outcome: Readiness) {
    if let Err(unsent) = to.send(outcome) {
        tracing::trace!(outcome = ?unsent, "readiness receiver already gone");
    }
}

/// Detect log level from a Redis log line.
///
/// Redis prefixes every message with a marker after the timestamp:
/// ```text
/// 4242:M 19 Oct 2026 10:15:02.117 * Ready to accept connections tcp
/// 4242:M 19 Oct 2026 10:15:02.117 # WARNING overcommit_memory is set to 0!
/// 4242:S 19 Oct 2026 10:15:02.118 - Accepted 127.0.0.1:50912
/// ```
/// `.` is debug, `-` verbose, `*` notice and `#` warning.
///
/// Returns INFO for lines without a marker (banner, ascii art, stderr noise).
fn detect_log_level(line: &str) -> Level {
    line.split_whitespace()
        .take(7)
        .find_map(|token| match token {
            "#" => Some(Level::WARN),
            "*" => Some(Level::INFO),
            "-" | "." => Some(Level::DEBUG),
            _ => None,
        })
        .unwrap_or(Level::INFO)
}

/// Forward a single line to tracing with the detected level.
fn forward_line(ctx: &WatchContext, stream: StreamKind, line: &str) {
    let level = detect_log_level(line);

    match level {
        Level::WARN => {
            tracing::warn!(
                instance = %ctx.instance,
                instance_id = %ctx.instance_id,
                stream = %stream,
                "{line}"
            );
        }
        Level::INFO => {
            tracing::info!(
                instance = %ctx.instance,
                instance_id = %ctx.instance_id,
                stream = %stream,
                "{line}"
            );
        }
        // detect_log_level never goes above WARN or below DEBUG.
        _ => {
            tracing::debug!(
                instance = %ctx.instance,
                instance_id = %ctx.instance_id,
                stream = %stream,
                "{line}"
            );
        }
    }
}

/// Strips the line terminator; invalid UTF-8 is replaced, never fatal.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Spawn a task that drains one output stream of a child process.
///
/// With a [`ReadyWatch`], every line is tested for readiness until the first
/// match, and the outcome is sent exactly once. Lines are recorded in the
/// transcript until readiness is decided.
///
/// The task runs until either:
/// - The stream is closed (child process exits)
/// - The cancellation token is triggered
pub fn spawn_line_watcher<S>(
    stream: S,
    ctx: WatchContext,
    kind: StreamKind,
    mut watch: Option<ReadyWatch>,
) -> JoinHandle<()>
where
    S: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        // stderr keeps recording until stdout has decided readiness.
        let mut recording = true;

        loop {
            tokio::select! {
                biased;

                () = ctx.cancel.cancelled() => {
                    tracing::debug!(
                        instance = %ctx.instance,
                        instance_id = %ctx.instance_id,
                        stream = ?kind,
                        "output watcher cancelled"
                    );
                    break;
                }

                // Partial reads stay in `buf` if the select is cancelled.
                result = reader.read_until(b'\n', &mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!(
                                instance = %ctx.instance,
                                instance_id = %ctx.instance_id,
                                stream = ?kind,
                                "output stream closed"
                            );
                            break;
                        }
                        Ok(_) => {
                            let line = decode_line(&buf);
                            buf.clear();
                            forward_line(&ctx, kind, &line);
                            if recording {
                                ctx.transcript.push(&line);
                            }
                            if let Some(pending) = watch.take() {
                                watch = pending.observe(&line);
                                recording = watch.is_some();
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                instance = %ctx.instance,
                                instance_id = %ctx.instance_id,
                                stream = ?kind,
                                error = %e,
                                "output stream read error"
                            );
                            break;
                        }
                    }
                }
            }
        }

        if let Some(pending) = watch {
            pending.close();
        }
    })
}
