#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Whole-topology start/stop against fake Redis executables.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::{FakeRedis, fast_launch};
use embedded_redis::{
    ExecutableResolver, InstanceKind, InstanceState, LaunchOptions, RedisError, SentinelInstance,
    Topology, TopologyBuilder,
};

fn all_states(topology: &Topology) -> Vec<(String, InstanceState)> {
    topology
        .servers()
        .chain(topology.sentinels().iter().map(SentinelInstance::instance))
        .map(|i| (i.name().to_owned(), i.state()))
        .collect()
}

#[tokio::test]
async fn test_fixed_topology_starts_and_stops() {
    let fake = FakeRedis::new();
    let mut topology = TopologyBuilder::new()
        .resolver(fake.resolver())
        .launch_options(fast_launch())
        .server_base_port(17379)
        .sentinel_base_port(27379)
        .replication_group("mymaster", 1)
        .sentinel_count(1)
        .build()
        .unwrap();

    topology.start().await.unwrap();
    assert!(topology.is_active());

    let ports = topology.ports().unwrap();
    assert_eq!(ports.masters["mymaster"], 17379);
    assert_eq!(ports.slaves["mymaster"], vec![17380]);
    assert_eq!(ports.sentinels, vec![27379]);
    assert_eq!(topology.sentinel_hosts().unwrap(), vec!["127.0.0.1:27379"]);

    let slave = &topology.group("mymaster").unwrap().slaves()[0];
    assert_eq!(&slave.args()[4..], ["--replicaof", "127.0.0.1", "17379"]);

    topology.stop().await.unwrap();
    assert!(
        all_states(&topology)
            .iter()
            .all(|(_, state)| *state == InstanceState::Stopped)
    );

    // Stopping twice is harmless.
    topology.stop().await.unwrap();
}

#[tokio::test]
async fn test_ephemeral_topology_gets_distinct_os_ports() {
    let fake = FakeRedis::new();
    let mut topology = TopologyBuilder::new()
        .resolver(fake.resolver())
        .launch_options(fast_launch())
        .replication_group("m1", 1)
        .replication_group("m2", 0)
        .replication_group("m3", 0)
        .sentinel_count(3)
        .ephemeral()
        .build()
        .unwrap();
    assert_eq!(topology.quorum(), 2);

    topology.start().await.unwrap();

    let ports = topology.ports().unwrap();
    let mut every_port: Vec<u16> = ports.sentinels.clone();
    every_port.extend(ports.masters.values().copied());
    every_port.extend(ports.slaves.values().flatten().copied());
    assert_eq!(every_port.len(), 7);
    assert!(every_port.iter().all(|p| *p != 0));
    assert_eq!(every_port.iter().collect::<HashSet<_>>().len(), 7);

    assert!(topology.servers().all(|s| s.declared_port() == 0));
    assert!(topology.sentinels().iter().all(|s| s.declared_port() == 0));

    // Peers were wired to the ports actually used.
    let m1_port = ports.masters["m1"].to_string();
    let slave = &topology.group("m1").unwrap().slaves()[0];
    assert_eq!(&slave.args()[4..], ["--replicaof", "127.0.0.1", m1_port.as_str()]);
    for sentinel in topology.sentinels() {
        for monitor in sentinel.monitors() {
            assert_eq!(monitor.endpoint.port, ports.masters[&monitor.name]);
            assert_eq!(monitor.quorum, 2);
        }
    }

    let hosts = topology.hosts().unwrap();
    assert_eq!(hosts.masters["m2"].host, "127.0.0.1");

    topology.stop().await.unwrap();
}

#[tokio::test]
async fn test_ephemeral_with_sentinel_ports_succeeds() {
    let fake = FakeRedis::new();
    let mut topology = TopologyBuilder::new()
        .resolver(fake.resolver())
        .launch_options(fast_launch())
        .replication_group("m1", 0)
        .sentinel_ports([26379, 26380])
        .ephemeral()
        .build()
        .unwrap();

    topology.start().await.unwrap();
    assert_eq!(topology.sentinels().len(), 2);
    assert!(topology.ports().unwrap().sentinels.iter().all(|p| *p != 0));
    topology.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_master_rolls_back_started_instances() {
    let fake = FakeRedis::new();
    let resolver = ExecutableResolver::new()
        .with_executable(InstanceKind::Server, fake.server_failing_on(18380))
        .with_executable(InstanceKind::Sentinel, fake.sentinel());
    let mut topology = TopologyBuilder::new()
        .resolver(resolver)
        .launch_options(fast_launch())
        .server_base_port(18379)
        .sentinel_base_port(28379)
        .replication_group("m1", 0)
        .replication_group("m2", 0)
        .sentinel_count(1)
        .build()
        .unwrap();

    let err = topology.start().await.unwrap_err();
    match &err {
        RedisError::StartupFailed {
            instance, output, ..
        } => {
            assert_eq!(instance, "m2");
            assert!(output.iter().any(|l| l.contains("Address already in use")));
        }
        other => panic!("unexpected error: {other}"),
    }

    let states = all_states(&topology);
    let state_of = |name: &str| states.iter().find(|(n, _)| n == name).unwrap().1;
    assert_eq!(state_of("m1"), InstanceState::Stopped);
    assert_eq!(state_of("m2"), InstanceState::Failed);
    assert_eq!(state_of("sentinel-1"), InstanceState::Stopped);
    assert!(topology.sentinels()[0].instance().pid().is_none());
    assert!(!topology.is_active());

    // Already rolled back; stop has nothing left to do.
    topology.stop().await.unwrap();
}

#[tokio::test]
async fn test_stalled_master_times_out_and_rolls_back() {
    let fake = FakeRedis::new();
    let resolver = ExecutableResolver::new()
        .with_executable(InstanceKind::Server, fake.server_silent_on(18481))
        .with_executable(InstanceKind::Sentinel, fake.sentinel());
    let launch = LaunchOptions {
        startup_timeout: Duration::from_millis(400),
        ..fast_launch()
    };
    let mut topology = TopologyBuilder::new()
        .resolver(resolver)
        .launch_options(launch)
        .server_base_port(18479)
        .sentinel_base_port(28479)
        .replication_group("m1", 1)
        .replication_group("m2", 0)
        .replication_group("m3", 0)
        .sentinel_count(2)
        .build()
        .unwrap();
    assert_eq!(topology.group("m2").unwrap().master().declared_port(), 18481);

    match topology.start().await.unwrap_err() {
        RedisError::StartupTimeout {
            instance, output, ..
        } => {
            assert_eq!(instance, "m2");
            assert!(output.iter().any(|l| l.contains("Loading RDB")));
        }
        other => panic!("unexpected error: {other}"),
    }

    for (name, state) in all_states(&topology) {
        let expected = if name == "m2" {
            InstanceState::Failed
        } else {
            InstanceState::Stopped
        };
        assert_eq!(state, expected, "instance {name}");
    }
    assert!(topology.servers().all(|s| s.pid().is_none()));
    assert!(
        topology
            .sentinels()
            .iter()
            .all(|s| s.instance().pid().is_none())
    );
    assert!(!topology.is_active());
}

#[tokio::test]
async fn test_topology_cannot_start_twice() {
    let fake = FakeRedis::new();
    let mut topology = TopologyBuilder::new()
        .resolver(fake.resolver())
        .launch_options(fast_launch())
        .server_base_port(19379)
        .sentinel_count(0)
        .replication_group("m1", 0)
        .build()
        .unwrap();

    topology.start().await.unwrap();
    assert!(matches!(
        topology.start().await,
        Err(RedisError::InvalidState {
            state: InstanceState::Ready,
            ..
        })
    ));
    topology.stop().await.unwrap();
}

#[tokio::test]
async fn test_empty_topology_is_trivially_active() {
    let mut topology = TopologyBuilder::new().sentinel_count(0).build().unwrap();
    topology.start().await.unwrap();
    assert!(topology.is_active());
    assert!(topology.ports().unwrap().masters.is_empty());
    topology.stop().await.unwrap();
}
