//! Error types for topology building and process supervision.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::instance::{InstanceKind, InstanceState};
use crate::platform::Platform;

/// Library-local result type.
pub type Result<T> = std::result::Result<T, RedisError>;

/// Typed error for building, starting and stopping Redis instances.
#[derive(Debug, Error)]
pub enum RedisError {
    #[error("No {kind} executable is known for platform {platform}")]
    UnsupportedPlatform {
        kind: InstanceKind,
        platform: Platform,
    },

    #[error("Duplicate master name: {0}")]
    DuplicateMasterName(String),

    #[error("Invalid quorum {quorum} for {sentinels} sentinel(s)")]
    InvalidQuorum { quorum: usize, sentinels: usize },

    #[error("Port {port} is requested more than once")]
    PortConflict { port: u16 },

    #[error("Expected {expected} sentinel port(s), got {actual}")]
    InvalidSentinelPorts { expected: usize, actual: usize },

    #[error("No free port left at or above {from}")]
    PortRangeExhausted { from: u16 },

    #[error("Invalid readiness pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Instance '{instance}' failed to start: {reason}")]
    StartupFailed {
        instance: String,
        reason: String,
        /// Output lines captured before the failure.
        output: Vec<String>,
    },

    #[error("Instance '{instance}' did not become ready within {}ms", .timeout.as_millis())]
    StartupTimeout {
        instance: String,
        timeout: Duration,
        /// Output lines captured before the process was killed.
        output: Vec<String>,
    },

    #[error("Failed to stop {0}")]
    StopFailed(StopReport),

    #[error("Cannot {operation} instance '{instance}' in state {state}")]
    InvalidState {
        instance: String,
        operation: &'static str,
        state: InstanceState,
    },

    #[error("Port of instance '{instance}' is not known yet")]
    PortUnresolved { instance: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RedisError {
    /// Output captured from the child process, if this error carries any.
    #[must_use]
    pub fn captured_output(&self) -> &[String] {
        match self {
            Self::StartupFailed { output, .. } | Self::StartupTimeout { output, .. } => output,
            _ => &[],
        }
    }
}

/// A single instance that could not be stopped cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopFailure {
    pub instance: String,
    pub reason: String,
}

/// Aggregated stop failures of a topology.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    pub failures: Vec<StopFailure>,
}

impl StopReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn push(&mut self, failure: StopFailure) {
        self.failures.push(failure);
    }

    /// Turns a non-empty report into `RedisError::StopFailed`.
    ///
    /// # Errors
    /// Returns `RedisError::StopFailed` when at least one failure was recorded.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(RedisError::StopFailed(self))
        }
    }
}

impl fmt::Display for StopReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} instance(s)", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{} ({})", failure.instance, failure.reason)?;
        }
        Ok(())
    }
}
