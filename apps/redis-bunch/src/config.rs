//! Layered application configuration.

use std::path::Path;

use anyhow::{Context, Result};
use embedded_redis::TopologyConfig;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

use crate::logging::LoggingConfig;

/// Environment variables with this prefix override file values;
/// `__` separates nested keys (`REDIS_BUNCH__TOPOLOGY__EPHEMERAL=true`).
pub const ENV_PREFIX: &str = "REDIS_BUNCH__";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub topology: TopologyConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Defaults, then the YAML file (if given), then the environment.
    ///
    /// # Errors
    /// Returns an error if a layer cannot be parsed or holds unknown keys.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("invalid configuration")
    }

    /// CLI flags are the last layer.
    pub fn apply_cli_overrides(&mut self, verbose: u8, ephemeral: bool) {
        match verbose {
            0 => {}
            1 => "debug".clone_into(&mut self.logging.level),
            _ => "trace".clone_into(&mut self.logging.level),
        }
        if ephemeral {
            self.topology.ephemeral = true;
        }
    }
}
