//! A built bunch of masters, replicas and sentinels started and stopped as a
//! unit.

use std::collections::BTreeMap;

use futures::future::join_all;
use serde::Serialize;

use crate::error::{RedisError, Result, StopFailure, StopReport};
use crate::instance::{InstanceState, ManagedInstance};
use crate::ports::{self, Endpoint};
use crate::sentinel::{MonitoredMaster, SentinelInstance};

/// One master and its replicas.
#[derive(Debug)]
pub struct ReplicationGroup {
    master_name: String,
    master: ManagedInstance,
    slaves: Vec<ManagedInstance>,
}

impl ReplicationGroup {
    pub(crate) fn new(
        master_name: String,
        master: ManagedInstance,
        slaves: Vec<ManagedInstance>,
    ) -> Self {
        Self {
            master_name,
            master,
            slaves,
        }
    }

    #[must_use]
    pub fn master_name(&self) -> &str {
        &self.master_name
    }

    #[must_use]
    pub fn master(&self) -> &ManagedInstance {
        &self.master
    }

    #[must_use]
    pub fn slaves(&self) -> &[ManagedInstance] {
        &self.slaves
    }

    /// Points every replica at the master's best-known endpoint.
    pub(crate) fn link_slaves(&mut self) {
        let master = self.master.planned_endpoint();
        for slave in &mut self.slaves {
            slave.set_links(vec![
                "--replicaof".to_owned(),
                master.host.clone(),
                master.port.to_string(),
            ]);
        }
    }
}

/// Per-role view of a topology: sentinels in order, masters and replicas
/// keyed by master name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Locations<T> {
    pub sentinels: Vec<T>,
    pub masters: BTreeMap<String, T>,
    pub slaves: BTreeMap<String, Vec<T>>,
}

impl<T> Locations<T> {
    #[must_use]
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Locations<U> {
        Locations {
            sentinels: self.sentinels.into_iter().map(&mut f).collect(),
            masters: self
                .masters
                .into_iter()
                .map(|(name, value)| (name, f(value)))
                .collect(),
            slaves: self
                .slaves
                .into_iter()
                .map(|(name, values)| (name, values.into_iter().map(&mut f).collect()))
                .collect(),
        }
    }
}

/// A group of instances started in dependency order and stopped in reverse.
///
/// Start brings masters up first, then replicas, then sentinels; instances of
/// one tier start concurrently. If any instance fails, everything already
/// started is stopped and the first error is returned.
#[derive(Debug)]
pub struct Topology {
    groups: Vec<ReplicationGroup>,
    sentinels: Vec<SentinelInstance>,
    quorum: usize,
    ephemeral: bool,
    host: String,
}

impl Topology {
    pub(crate) fn new(
        groups: Vec<ReplicationGroup>,
        sentinels: Vec<SentinelInstance>,
        quorum: usize,
        ephemeral: bool,
        host: String,
    ) -> Self {
        Self {
            groups,
            sentinels,
            quorum,
            ephemeral,
            host,
        }
    }

    #[must_use]
    pub fn groups(&self) -> &[ReplicationGroup] {
        &self.groups
    }

    #[must_use]
    pub fn group(&self, master_name: &str) -> Option<&ReplicationGroup> {
        self.groups.iter().find(|g| g.master_name == master_name)
    }

    #[must_use]
    pub fn sentinels(&self) -> &[SentinelInstance] {
        &self.sentinels
    }

    #[must_use]
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Every server instance: masters first, then replicas.
    pub fn servers(&self) -> impl Iterator<Item = &ManagedInstance> {
        self.groups
            .iter()
            .map(|g| &g.master)
            .chain(self.groups.iter().flat_map(|g| g.slaves.iter()))
    }

    /// True once every instance reports `Ready`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.servers()
            .chain(self.sentinels.iter().map(SentinelInstance::instance))
            .all(|i| i.state() == InstanceState::Ready)
    }

    /// Starts masters, then replicas, then sentinels.
    ///
    /// # Errors
    /// - `RedisError::InvalidState` if any instance was already started
    /// - the first startup error of any instance; every instance started
    ///   before the failure is stopped again
    pub async fn start(&mut self) -> Result<()> {
        if let Some(started) = self
            .servers()
            .chain(self.sentinels.iter().map(SentinelInstance::instance))
            .find(|i| i.state() != InstanceState::NotStarted)
        {
            return Err(RedisError::InvalidState {
                instance: started.name().to_owned(),
                operation: "start",
                state: started.state(),
            });
        }

        tracing::info!(
            masters = self.groups.len(),
            slaves = self.groups.iter().map(|g| g.slaves.len()).sum::<usize>(),
            sentinels = self.sentinels.len(),
            ephemeral = self.ephemeral,
            "starting redis topology"
        );

        if let Err(e) = self.start_tiers().await {
            tracing::warn!(error = %e, "topology start failed, stopping started instances");
            let report = self.stop_all().await;
            if !report.is_empty() {
                tracing::warn!(%report, "rollback left instances behind");
            }
            return Err(e);
        }

        tracing::info!("redis topology ready");
        Ok(())
    }

    async fn start_tiers(&mut self) -> Result<()> {
        let host = self.host.clone();

        assign_ephemeral(&host, self.groups.iter_mut().map(|g| &mut g.master))?;
        first_error(join_all(self.groups.iter_mut().map(|g| g.master.start())).await)?;

        for group in &mut self.groups {
            group.link_slaves();
        }
        assign_ephemeral(
            &host,
            self.groups.iter_mut().flat_map(|g| g.slaves.iter_mut()),
        )?;
        first_error(
            join_all(
                self.groups
                    .iter_mut()
                    .flat_map(|g| g.slaves.iter_mut())
                    .map(ManagedInstance::start),
            )
            .await,
        )?;

        let masters = self.monitored_masters();
        for sentinel in &mut self.sentinels {
            sentinel.set_monitors(masters.clone());
        }
        assign_ephemeral(
            &host,
            self.sentinels.iter_mut().map(SentinelInstance::instance_mut),
        )?;
        first_error(join_all(self.sentinels.iter_mut().map(SentinelInstance::start)).await)
    }

    /// Stops sentinels, then replicas, then masters.
    ///
    /// Idempotent. Failures do not interrupt the sequence; they are collected
    /// and returned together.
    ///
    /// # Errors
    /// Returns `RedisError::StopFailed` listing every instance that could not
    /// be stopped.
    pub async fn stop(&mut self) -> Result<()> {
        let report = self.stop_all().await;
        if report.is_empty() {
            tracing::info!("redis topology stopped");
        }
        report.into_result()
    }

    async fn stop_all(&mut self) -> StopReport {
        let mut report = StopReport::default();
        for sentinel in self.sentinels.iter_mut().rev() {
            let result = sentinel.stop().await;
            collect_stop(&mut report, sentinel.name(), result);
        }
        for group in self.groups.iter_mut().rev() {
            for slave in group.slaves.iter_mut().rev() {
                let result = slave.stop().await;
                collect_stop(&mut report, slave.name(), result);
            }
        }
        for group in self.groups.iter_mut().rev() {
            let result = group.master.stop().await;
            collect_stop(&mut report, group.master.name(), result);
        }
        report
    }

    /// Effective ports of every instance.
    ///
    /// # Errors
    /// Returns `RedisError::PortUnresolved` for an instance declared with
    /// port 0 that has not been launched yet.
    pub fn ports(&self) -> Result<Locations<u16>> {
        let sentinels = self
            .sentinels
            .iter()
            .map(|s| resolved_port(s.instance()))
            .collect::<Result<Vec<_>>>()?;
        let mut masters = BTreeMap::new();
        let mut slaves = BTreeMap::new();
        for group in &self.groups {
            masters.insert(group.master_name.clone(), resolved_port(&group.master)?);
            let ports = group
                .slaves
                .iter()
                .map(resolved_port)
                .collect::<Result<Vec<_>>>()?;
            slaves.insert(group.master_name.clone(), ports);
        }
        Ok(Locations {
            sentinels,
            masters,
            slaves,
        })
    }

    /// Same as [`ports`](Self::ports) with the bind host attached.
    ///
    /// # Errors
    /// Returns `RedisError::PortUnresolved` like [`ports`](Self::ports).
    pub fn hosts(&self) -> Result<Locations<Endpoint>> {
        let host = self.host.clone();
        Ok(self.ports()?.map(|port| Endpoint::new(host.clone(), port)))
    }

    /// `host:port` of every sentinel, the form sentinel-aware clients take.
    ///
    /// # Errors
    /// Returns `RedisError::PortUnresolved` like [`ports`](Self::ports).
    pub fn sentinel_hosts(&self) -> Result<Vec<String>> {
        Ok(self
            .hosts()?
            .sentinels
            .iter()
            .map(Endpoint::to_string)
            .collect())
    }

    fn monitored_masters(&self) -> Vec<MonitoredMaster> {
        self.groups
            .iter()
            .map(|group| MonitoredMaster {
                name: group.master_name.clone(),
                endpoint: group.master.planned_endpoint(),
                quorum: self.quorum,
            })
            .collect()
    }
}

/// Declared port when fixed, effective port once launched.
fn resolved_port(instance: &ManagedInstance) -> Result<u16> {
    instance
        .effective_port()
        .or(instance.launch_port())
        .ok_or_else(|| RedisError::PortUnresolved {
            instance: instance.name().to_owned(),
        })
}

/// Reserves OS ports for every instance of a tier still lacking one.
fn assign_ephemeral<'a>(
    host: &str,
    instances: impl Iterator<Item = &'a mut ManagedInstance>,
) -> Result<()> {
    let mut pending: Vec<&mut ManagedInstance> =
        instances.filter(|i| i.needs_launch_port()).collect();
    if pending.is_empty() {
        return Ok(());
    }
    let reserved = ports::reserve_ephemeral(host, pending.len())?;
    for (instance, port) in pending.iter_mut().zip(reserved) {
        instance.assign_launch_port(port);
    }
    Ok(())
}

fn first_error(results: Vec<Result<()>>) -> Result<()> {
    results.into_iter().collect()
}

fn collect_stop(report: &mut StopReport, instance: &str, result: Result<()>) {
    match result {
        Ok(()) => {}
        Err(RedisError::StopFailed(failed)) => report.failures.extend(failed.failures),
        Err(e) => report.push(StopFailure {
            instance: instance.to_owned(),
            reason: e.to_string(),
        }),
    }
}
