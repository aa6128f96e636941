//! Fluent construction of a [`Topology`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{
    DEFAULT_SENTINEL_PORT, DEFAULT_SERVER_PORT, LaunchOptions, SentinelSettings, TopologyConfig,
};
use crate::error::{RedisError, Result};
use crate::instance::{InstanceKind, ManagedInstance};
use crate::platform::Platform;
use crate::ports::{PortCursor, PortLedger};
use crate::resolver::ExecutableResolver;
use crate::sentinel::{MonitoredMaster, SentinelInstance};
use crate::topology::{ReplicationGroup, Topology};

#[derive(Debug, Clone)]
struct GroupPlan {
    master_name: String,
    slaves: usize,
}

/// Collects topology options; [`build`](Self::build) validates them and
/// produces an unstarted [`Topology`].
///
/// ```no_run
/// # async fn demo() -> embedded_redis::Result<()> {
/// let mut topology = embedded_redis::TopologyBuilder::new()
///     .replication_group("mymaster", 1)
///     .sentinel_count(3)
///     .ephemeral()
///     .build()?;
/// topology.start().await?;
/// println!("{:?}", topology.sentinel_hosts()?);
/// topology.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    groups: Vec<GroupPlan>,
    sentinel_count: Option<usize>,
    sentinel_ports: Option<Vec<u16>>,
    quorum: Option<usize>,
    ephemeral: bool,
    server_base_port: u16,
    sentinel_base_port: u16,
    launch: LaunchOptions,
    sentinel_settings: SentinelSettings,
    resolver: ExecutableResolver,
    platform: Option<Platform>,
}

impl Default for TopologyBuilder {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            sentinel_count: None,
            sentinel_ports: None,
            quorum: None,
            ephemeral: false,
            server_base_port: DEFAULT_SERVER_PORT,
            sentinel_base_port: DEFAULT_SENTINEL_PORT,
            launch: LaunchOptions::default(),
            sentinel_settings: SentinelSettings::default(),
            resolver: ExecutableResolver::default(),
            platform: None,
        }
    }
}

impl TopologyBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pre-filled from a declarative config.
    #[must_use]
    pub fn from_config(config: &TopologyConfig) -> Self {
        Self {
            groups: config
                .replication_groups
                .iter()
                .map(|g| GroupPlan {
                    master_name: g.master_name.clone(),
                    slaves: g.slaves,
                })
                .collect(),
            sentinel_count: config.sentinel_count,
            sentinel_ports: config.sentinel_ports.clone(),
            quorum: config.quorum,
            ephemeral: config.ephemeral,
            server_base_port: config.server_base_port,
            sentinel_base_port: config.sentinel_base_port,
            launch: config.launch.clone(),
            sentinel_settings: config.sentinel.clone(),
            resolver: config.executables.resolver(),
            platform: None,
        }
    }

    /// Number of sentinels; defaults to the number of sentinel ports, or 1.
    #[must_use]
    pub fn sentinel_count(mut self, count: usize) -> Self {
        self.sentinel_count = Some(count);
        self
    }

    /// Explicit sentinel ports, one per sentinel. Port 0 lets the OS choose.
    #[must_use]
    pub fn sentinel_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.sentinel_ports = Some(ports.into_iter().collect());
        self
    }

    /// Sentinels that must agree before a master is considered down.
    #[must_use]
    pub fn quorum_size(mut self, quorum: usize) -> Self {
        self.quorum = Some(quorum);
        self
    }

    /// Adds a master named `master_name` with `slaves` replicas.
    #[must_use]
    pub fn replication_group(mut self, master_name: impl Into<String>, slaves: usize) -> Self {
        self.groups.push(GroupPlan {
            master_name: master_name.into(),
            slaves,
        });
        self
    }

    /// Lets the OS choose every port at launch.
    #[must_use]
    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    /// First port tried for servers in fixed mode.
    #[must_use]
    pub fn server_base_port(mut self, port: u16) -> Self {
        self.server_base_port = port;
        self
    }

    /// First port tried for sentinels in fixed mode.
    #[must_use]
    pub fn sentinel_base_port(mut self, port: u16) -> Self {
        self.sentinel_base_port = port;
        self
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.launch.host = host.into();
        self
    }

    #[must_use]
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.launch.startup_timeout = timeout;
        self
    }

    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.launch.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn launch_options(mut self, options: LaunchOptions) -> Self {
        self.launch = options;
        self
    }

    #[must_use]
    pub fn sentinel_settings(mut self, settings: SentinelSettings) -> Self {
        self.sentinel_settings = settings;
        self
    }

    #[must_use]
    pub fn resolver(mut self, resolver: ExecutableResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Resolves executables for `platform` instead of the host platform.
    #[must_use]
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Validates the options and lays out every instance.
    ///
    /// In fixed mode, servers get sequential ports from the server base port
    /// in group order (master, then its replicas) and sentinels from the
    /// sentinel base port, skipping explicitly requested ports. In ephemeral
    /// mode every instance is declared with port 0.
    ///
    /// # Errors
    /// - `RedisError::InvalidSentinelPorts` when sentinel ports and count disagree
    /// - `RedisError::InvalidQuorum` when the quorum is 0 or exceeds the sentinels
    /// - `RedisError::DuplicateMasterName` when two groups share a name
    /// - `RedisError::PortConflict` when a port would be used twice
    /// - `RedisError::PortRangeExhausted` when sequential allocation runs out
    /// - `RedisError::UnsupportedPlatform` when no executable is known
    pub fn build(self) -> Result<Topology> {
        let sentinel_count = self.resolve_sentinel_count()?;
        let quorum = self.resolve_quorum(sentinel_count)?;
        self.check_master_names()?;

        let platform = self.platform.unwrap_or_else(Platform::current);
        let server_exe = if self.groups.is_empty() {
            None
        } else {
            Some(self.resolver.resolve_for(InstanceKind::Server, platform)?)
        };
        let sentinel_exe = if sentinel_count == 0 {
            None
        } else {
            Some(self.resolver.resolve_for(InstanceKind::Sentinel, platform)?)
        };

        let (server_ports, sentinel_ports) = self.allocate_ports(sentinel_count)?;
        let mut server_ports = server_ports.into_iter();

        let mut groups = Vec::with_capacity(self.groups.len());
        if let Some(exe) = &server_exe {
            for plan in &self.groups {
                let master = self.server(&plan.master_name, exe, server_ports.next());
                let slaves = (1..=plan.slaves)
                    .map(|i| {
                        let name = format!("{}-slave-{i}", plan.master_name);
                        self.server(&name, exe, server_ports.next())
                    })
                    .collect();
                let mut group = ReplicationGroup::new(plan.master_name.clone(), master, slaves);
                group.link_slaves();
                groups.push(group);
            }
        }

        let masters: Vec<MonitoredMaster> = groups
            .iter()
            .map(|g| MonitoredMaster {
                name: g.master_name().to_owned(),
                endpoint: g.master().planned_endpoint(),
                quorum,
            })
            .collect();

        let mut sentinels = Vec::with_capacity(sentinel_count);
        if let Some(exe) = &sentinel_exe {
            for (i, port) in sentinel_ports.into_iter().enumerate() {
                let mut sentinel = SentinelInstance::new(
                    format!("sentinel-{}", i + 1),
                    exe,
                    port,
                    self.launch.clone(),
                    self.sentinel_settings.clone(),
                );
                sentinel.set_monitors(masters.clone());
                sentinels.push(sentinel);
            }
        }

        tracing::debug!(
            masters = groups.len(),
            sentinels = sentinels.len(),
            quorum,
            ephemeral = self.ephemeral,
            platform = %platform,
            "built redis topology"
        );

        Ok(Topology::new(
            groups,
            sentinels,
            quorum,
            self.ephemeral,
            self.launch.host,
        ))
    }

    fn server(&self, name: &str, exe: &Path, port: Option<u16>) -> ManagedInstance {
        ManagedInstance::new(
            name,
            InstanceKind::Server,
            exe,
            port.unwrap_or(0),
            self.launch.clone(),
        )
    }

    fn resolve_sentinel_count(&self) -> Result<usize> {
        match (&self.sentinel_ports, self.sentinel_count) {
            (Some(ports), Some(count)) if !self.ephemeral && ports.len() != count => {
                Err(RedisError::InvalidSentinelPorts {
                    expected: count,
                    actual: ports.len(),
                })
            }
            (_, Some(count)) => Ok(count),
            (Some(ports), None) => Ok(ports.len()),
            (None, None) => Ok(1),
        }
    }

    fn resolve_quorum(&self, sentinels: usize) -> Result<usize> {
        match self.quorum {
            Some(quorum) if quorum == 0 || quorum > sentinels => {
                Err(RedisError::InvalidQuorum { quorum, sentinels })
            }
            Some(quorum) => Ok(quorum),
            None => Ok(sentinels.div_euclid(2) + 1),
        }
    }

    fn check_master_names(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for plan in &self.groups {
            if !seen.insert(plan.master_name.as_str()) {
                return Err(RedisError::DuplicateMasterName(plan.master_name.clone()));
            }
        }
        Ok(())
    }

    /// Server ports in group order and one port per sentinel.
    fn allocate_ports(&self, sentinel_count: usize) -> Result<(Vec<u16>, Vec<u16>)> {
        let server_count: usize = self.groups.iter().map(|g| 1 + g.slaves).sum();

        if self.ephemeral {
            if self.sentinel_ports.is_some() {
                tracing::warn!("ephemeral topology ignores explicit sentinel ports");
            }
            return Ok((vec![0; server_count], vec![0; sentinel_count]));
        }

        let mut ledger = PortLedger::new();
        if let Some(ports) = &self.sentinel_ports {
            for port in ports {
                ledger.claim(*port)?;
            }
        }

        let mut cursor = PortCursor::starting_at(self.server_base_port);
        let server_ports = (0..server_count)
            .map(|_| ledger.allocate(&mut cursor))
            .collect::<Result<Vec<_>>>()?;

        let sentinel_ports = match &self.sentinel_ports {
            Some(ports) => ports.clone(),
            None => {
                let mut cursor = PortCursor::starting_at(self.sentinel_base_port);
                (0..sentinel_count)
                    .map(|_| ledger.allocate(&mut cursor))
                    .collect::<Result<Vec<_>>>()?
            }
        };
        Ok((server_ports, sentinel_ports))
    }
}
