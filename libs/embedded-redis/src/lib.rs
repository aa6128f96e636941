#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Ephemeral Redis servers, replicas and sentinels for test suites.
//!
//! The crate launches native `redis-server` / `redis-sentinel` binaries as
//! child processes, waits for each to print its readiness line and tears
//! them down again. A [`TopologyBuilder`] lays out whole bunches: replication
//! groups (a master plus replicas) monitored by a set of sentinels.
//!
//! # Ports
//! - Fixed mode: servers get sequential ports from 6379 and sentinels from
//!   26379, skipping any explicitly requested port.
//! - Ephemeral mode: every instance is declared with port 0. Free ports are
//!   reserved from the OS tier by tier right before launch, and the port a
//!   process announces in its startup banner wins.
//!
//! # Example
//! ```rust,no_run
//! use embedded_redis::TopologyBuilder;
//!
//! # async fn run() -> embedded_redis::Result<()> {
//! let mut topology = TopologyBuilder::new()
//!     .replication_group("m1", 1)
//!     .replication_group("m2", 0)
//!     .sentinel_count(3)
//!     .ephemeral()
//!     .build()?;
//!
//! topology.start().await?;
//! let hosts = topology.hosts()?;
//! println!("m1 listens on {}", hosts.masters["m1"]);
//! topology.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod instance;
pub mod platform;
pub mod ports;
pub mod readiness;
pub mod resolver;
pub mod sentinel;
pub mod topology;

pub use builder::TopologyBuilder;
pub use config::{
    ExecutablesConfig, LaunchOptions, ReplicationGroupConfig, SentinelSettings, TopologyConfig,
};
pub use error::{RedisError, Result, StopFailure, StopReport};
pub use instance::{InstanceKind, InstanceState, ManagedInstance, RedisInstance};
pub use platform::{Architecture, Os, Platform};
pub use ports::Endpoint;
pub use readiness::{LinePattern, ReadyPredicate};
pub use resolver::ExecutableResolver;
pub use sentinel::{MonitoredMaster, SentinelInstance};
pub use topology::{Locations, ReplicationGroup, Topology};
