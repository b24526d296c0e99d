//! Configuration Loader
//!
//! Layers defaults, an optional TOML file and environment variables with the
//! `config` crate, then validates the result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use tracing::debug;

use super::error::ConfigResult;
use super::RemoteMakeConfig;

/// Searched when no explicit file is given; the extension is resolved by the loader
pub const DEFAULT_CONFIG_FILE: &str = "config/remote-make";

pub const ENV_PREFIX: &str = "REMOTE_MAKE";

/// Flat variables and the keys they override
const LEGACY_OVERRIDES: &[(&str, &str)] = &[
    ("NODE_UUID", "node.id"),
    ("BUS_URL", "bus.url"),
    ("STEP_RUNNER_ENABLED", "subsystems.step_dispatcher_enabled"),
    ("TASK_RUNNER_ENABLED", "subsystems.task_orchestrator_enabled"),
    ("NODE_MANAGER_ENABLED", "subsystems.worker_manager_enabled"),
    ("EMBEDDED_BROKER_ENABLED", "bus.embedded_broker"),
];

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    search_default_file: bool,
    env: Option<HashMap<String, String>>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            file: None,
            search_default_file: true,
            env: None,
        }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load this file instead of the default location; it must exist
    #[must_use]
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Skip `config/remote-make.toml`
    #[must_use]
    pub fn without_default_file(mut self) -> Self {
        self.search_default_file = false;
        self
    }

    /// Read variables from `vars` instead of the process environment
    #[must_use]
    pub fn with_env(mut self, vars: HashMap<String, String>) -> Self {
        self.env = Some(vars);
        self
    }

    pub fn load(&self) -> ConfigResult<RemoteMakeConfig> {
        let vars: HashMap<String, String> = match &self.env {
            Some(vars) => vars.clone(),
            None => std::env::vars().collect(),
        };

        let mut builder = Config::builder();
        if let Some(path) = &self.file {
            builder = builder.add_source(File::from(path.as_path()).required(true));
        } else if self.search_default_file {
            builder = builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(Some(vars.clone().into_iter().collect())),
        );

        for (var, key) in LEGACY_OVERRIDES {
            if let Some(value) = vars.get(*var) {
                debug!(variable = %var, key = %key, "Applying environment override");
                builder = builder.set_override(*key, value.as_str())?;
            }
        }

        let config: RemoteMakeConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        debug!(
            file = ?self.file,
            transport = ?config.bus.transport,
            node_id = ?config.node.id,
            "Configuration loaded"
        );
        Ok(config)
    }
}
