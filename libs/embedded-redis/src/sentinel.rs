//! Sentinel instances and their monitor directives.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::{LaunchOptions, SentinelSettings};
use crate::error::Result;
use crate::instance::{InstanceKind, InstanceState, ManagedInstance, RedisInstance};
use crate::ports::Endpoint;

/// A master a sentinel watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredMaster {
    pub name: String,
    pub endpoint: Endpoint,
    pub quorum: usize,
}

/// A managed `redis-sentinel` process with its monitored masters.
///
/// Monitors are rendered as `--sentinel monitor <name> <host> <port> <quorum>`
/// followed by the failure-detection directives for that master.
#[derive(Debug)]
pub struct SentinelInstance {
    inner: ManagedInstance,
    settings: SentinelSettings,
    monitors: Vec<MonitoredMaster>,
}

impl SentinelInstance {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        executable: impl Into<PathBuf>,
        port: u16,
        options: LaunchOptions,
        settings: SentinelSettings,
    ) -> Self {
        Self {
            inner: ManagedInstance::new(name, InstanceKind::Sentinel, executable, port, options),
            settings,
            monitors: Vec::new(),
        }
    }

    /// Adds a master to watch.
    pub fn monitor(&mut self, master: MonitoredMaster) {
        self.monitors.push(master);
        self.relink();
    }

    /// Replaces the watched masters.
    pub fn set_monitors(&mut self, masters: Vec<MonitoredMaster>) {
        self.monitors = masters;
        self.relink();
    }

    #[must_use]
    pub fn monitors(&self) -> &[MonitoredMaster] {
        &self.monitors
    }

    #[must_use]
    pub fn settings(&self) -> &SentinelSettings {
        &self.settings
    }

    #[must_use]
    pub fn instance(&self) -> &ManagedInstance {
        &self.inner
    }

    pub(crate) fn instance_mut(&mut self) -> &mut ManagedInstance {
        &mut self.inner
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    #[must_use]
    pub fn state(&self) -> InstanceState {
        self.inner.state()
    }

    #[must_use]
    pub fn declared_port(&self) -> u16 {
        self.inner.declared_port()
    }

    #[must_use]
    pub fn effective_port(&self) -> Option<u16> {
        self.inner.effective_port()
    }

    #[must_use]
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.inner.endpoint()
    }

    /// Launch directives including the monitor block.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        self.inner.args()
    }

    /// # Errors
    /// Same as [`ManagedInstance::start`].
    pub async fn start(&mut self) -> Result<()> {
        self.inner.start().await
    }

    /// # Errors
    /// Same as [`ManagedInstance::stop`].
    pub async fn stop(&mut self) -> Result<()> {
        self.inner.stop().await
    }

    fn relink(&mut self) {
        let directives = self
            .monitors
            .iter()
            .flat_map(|master| monitor_directives(master, &self.settings))
            .collect();
        self.inner.set_links(directives);
    }
}

fn monitor_directives(master: &MonitoredMaster, settings: &SentinelSettings) -> Vec<String> {
    let name = master.name.as_str();
    let sentinel = |directive: &str, value: String| {
        [
            "--sentinel".to_owned(),
            directive.to_owned(),
            name.to_owned(),
            value,
        ]
    };

    let mut args = vec![
        "--sentinel".to_owned(),
        "monitor".to_owned(),
        name.to_owned(),
        master.endpoint.host.clone(),
        master.endpoint.port.to_string(),
        master.quorum.to_string(),
    ];
    args.extend(sentinel(
        "down-after-milliseconds",
        settings.down_after.as_millis().to_string(),
    ));
    args.extend(sentinel(
        "failover-timeout",
        settings.failover_timeout.as_millis().to_string(),
    ));
    args.extend(sentinel(
        "parallel-syncs",
        settings.parallel_syncs.to_string(),
    ));
    args
}

#[async_trait]
impl RedisInstance for SentinelInstance {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind(&self) -> InstanceKind {
        InstanceKind::Sentinel
    }

    fn state(&self) -> InstanceState {
        self.inner.state()
    }

    fn declared_port(&self) -> u16 {
        self.inner.declared_port()
    }

    fn effective_port(&self) -> Option<u16> {
        self.inner.effective_port()
    }

    async fn start(&mut self) -> Result<()> {
        self.inner.start().await
    }

    async fn stop(&mut self) -> Result<()> {
        self.inner.stop().await
    }
}
