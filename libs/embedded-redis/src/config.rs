//! Serializable configuration for instances and topologies.
//!
//! Every struct deserializes with defaults for missing fields and rejects
//! unknown keys, so a partial YAML document is enough to describe a topology.
//! Durations are written in humantime notation (`10s`, `1m 30s`, `250ms`).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::instance::InstanceKind;
use crate::resolver::ExecutableResolver;

pub const DEFAULT_SERVER_PORT: u16 = 6379;
pub const DEFAULT_SENTINEL_PORT: u16 = 26379;

/// Per-process launch tuning shared by every instance of a topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LaunchOptions {
    /// Address the instances bind to and advertise.
    pub host: String,
    /// How long to wait for the readiness line before killing the process.
    #[serde(with = "humantime_duration")]
    pub startup_timeout: Duration,
    /// Time between SIGTERM and a forced kill on stop.
    #[serde(with = "humantime_duration")]
    pub stop_grace: Duration,
    /// Number of early output lines kept for startup diagnostics.
    pub output_capture_lines: usize,
    /// Fixed working directory root; a fresh temporary directory per instance
    /// is used when unset.
    pub working_dir: Option<PathBuf>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            host: default_host(),
            startup_timeout: Duration::from_secs(10),
            stop_grace: Duration::from_secs(2),
            output_capture_lines: 100,
            working_dir: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

/// Failure-detection knobs written into every sentinel's monitor directives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SentinelSettings {
    #[serde(with = "humantime_duration")]
    pub down_after: Duration,
    #[serde(with = "humantime_duration")]
    pub failover_timeout: Duration,
    pub parallel_syncs: u32,
}

impl Default for SentinelSettings {
    fn default() -> Self {
        Self {
            down_after: Duration::from_secs(60),
            failover_timeout: Duration::from_secs(180),
            parallel_syncs: 1,
        }
    }
}

/// Where to find the native binaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutablesConfig {
    /// Directory holding the platform-named binaries.
    pub base_dir: Option<PathBuf>,
    /// Server binary used on every platform.
    pub server: Option<PathBuf>,
    /// Sentinel binary used on every platform.
    pub sentinel: Option<PathBuf>,
}

impl ExecutablesConfig {
    #[must_use]
    pub fn resolver(&self) -> ExecutableResolver {
        let mut resolver = ExecutableResolver::new();
        if let Some(dir) = &self.base_dir {
            resolver = resolver.with_base_dir(dir);
        }
        if let Some(path) = &self.server {
            resolver = resolver.with_executable(InstanceKind::Server, path);
        }
        if let Some(path) = &self.sentinel {
            resolver = resolver.with_executable(InstanceKind::Sentinel, path);
        }
        resolver
    }
}

/// One master and the number of replicas attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicationGroupConfig {
    pub master_name: String,
    #[serde(default)]
    pub slaves: usize,
}

/// Declarative description of a whole topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TopologyConfig {
    pub replication_groups: Vec<ReplicationGroupConfig>,
    /// Defaults to the number of `sentinel_ports`, or 1.
    pub sentinel_count: Option<usize>,
    pub sentinel_ports: Option<Vec<u16>>,
    /// Defaults to a majority of the sentinels.
    pub quorum: Option<usize>,
    /// Let the OS choose every port at launch.
    pub ephemeral: bool,
    pub server_base_port: u16,
    pub sentinel_base_port: u16,
    pub launch: LaunchOptions,
    pub sentinel: SentinelSettings,
    pub executables: ExecutablesConfig,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            replication_groups: Vec::new(),
            sentinel_count: None,
            sentinel_ports: None,
            quorum: None,
            ephemeral: false,
            server_base_port: DEFAULT_SERVER_PORT,
            sentinel_base_port: DEFAULT_SENTINEL_PORT,
            launch: LaunchOptions::default(),
            sentinel: SentinelSettings::default(),
            executables: ExecutablesConfig::default(),
        }
    }
}

/// `Duration` <-> humantime string.
mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_defaults() {
        let options = LaunchOptions::default();
        assert_eq!(options.host, "127.0.0.1");
        assert_eq!(options.startup_timeout, Duration::from_secs(10));
        assert_eq!(options.stop_grace, Duration::from_secs(2));
        assert_eq!(options.output_capture_lines, 100);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: TopologyConfig = serde_json::from_str(
            r#"{
                "replication_groups": [{"master_name": "mymaster", "slaves": 1}],
                "launch": {"startup_timeout": "30s"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.replication_groups.len(), 1);
        assert_eq!(config.server_base_port, 6379);
        assert_eq!(config.sentinel_base_port, 26379);
        assert_eq!(config.launch.startup_timeout, Duration::from_secs(30));
        assert_eq!(config.launch.stop_grace, Duration::from_secs(2));
        assert_eq!(config.sentinel.parallel_syncs, 1);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: Result<TopologyConfig, _> =
            serde_json::from_str(r#"{"replication_group": []}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let result: Result<LaunchOptions, _> =
            serde_json::from_str(r#"{"startup_timeout": "soon"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_durations_serialize_as_humantime() {
        let json = serde_json::to_value(SentinelSettings::default()).unwrap();
        assert_eq!(json["down_after"], "1m");
        assert_eq!(json["failover_timeout"], "3m");
    }

    #[test]
    fn test_executables_config_builds_resolver() {
        let config = ExecutablesConfig {
            base_dir: Some(PathBuf::from("/opt/redis")),
            server: None,
            sentinel: Some(PathBuf::from("/bin/sentinel")),
        };
        let resolver = config.resolver();
        assert_eq!(
            resolver
                .resolve_for(InstanceKind::Server, crate::platform::Platform::LINUX_AMD64)
                .unwrap(),
            PathBuf::from("/opt/redis/redis-server-linux-amd64")
        );
        assert_eq!(
            resolver
                .resolve_for(InstanceKind::Sentinel, crate::platform::Platform::LINUX_AMD64)
                .unwrap(),
            PathBuf::from("/bin/sentinel")
        );
    }
}
