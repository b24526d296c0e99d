//! # Configuration
//!
//! Node configuration, loaded once at startup by [`ConfigLoader`] and turned
//! into plain constructor parameters by [`bootstrap`](crate::bootstrap).
//! Nothing below the bootstrap layer reads the environment.
//!
//! ## Sources, lowest precedence first
//!
//! 1. Built-in defaults
//! 2. TOML file (`config/remote-make.toml`, or an explicit path)
//! 3. `REMOTE_MAKE__<SECTION>__<KEY>` environment variables
//! 4. Flat variables provisioned workers are started with: `NODE_UUID`,
//!    `BUS_URL`, `STEP_RUNNER_ENABLED`, `TASK_RUNNER_ENABLED`,
//!    `NODE_MANAGER_ENABLED`, `EMBEDDED_BROKER_ENABLED`
//!
//! ```toml
//! [bus]
//! transport = "tcp"
//! url = "127.0.0.1:4222"
//!
//! [timeouts]
//! step_seconds = 30
//! ```

pub mod error;
pub mod loader;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::logging::LogFormat;
use crate::node::{NodeId, NodeSubsystems};
use crate::orchestration::OrchestratorTimeouts;
use crate::provisioning::DockerSettings;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteMakeConfig {
    pub node: NodeConfig,
    pub bus: BusConfig,
    pub timeouts: TimeoutConfig,
    pub subsystems: SubsystemConfig,
    pub docker: DockerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Fixed node id; generated at startup when absent
    pub id: Option<Uuid>,
    /// Node running the worker lifecycle manager, when this node does not
    pub manager_node: Option<Uuid>,
}

impl NodeConfig {
    pub fn node_id(&self) -> Option<NodeId> {
        self.id.map(NodeId::from_uuid)
    }

    pub fn manager_node_id(&self) -> Option<NodeId> {
        self.manager_node.map(NodeId::from_uuid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusTransport {
    /// Single process, no network
    #[default]
    Memory,
    /// TCP broker shared by all nodes
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub transport: BusTransport,
    /// Broker address for the TCP transport
    pub url: String,
    /// Run the broker inside this process
    pub embedded_broker: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            transport: BusTransport::Memory,
            url: "127.0.0.1:4222".to_string(),
            embedded_broker: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub provision_seconds: u64,
    /// Whole-task budget for the master and for `task.start` requests
    pub task_seconds: u64,
    pub step_seconds: u64,
    pub cleanup_seconds: u64,
    /// Budget for serving a single bus request
    pub handler_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            provision_seconds: 360,
            task_seconds: 3600,
            step_seconds: 360,
            cleanup_seconds: 60,
            handler_seconds: 360,
        }
    }
}

impl TimeoutConfig {
    pub fn provision(&self) -> Duration {
        Duration::from_secs(self.provision_seconds)
    }

    pub fn task(&self) -> Duration {
        Duration::from_secs(self.task_seconds)
    }

    pub fn step(&self) -> Duration {
        Duration::from_secs(self.step_seconds)
    }

    pub fn cleanup(&self) -> Duration {
        Duration::from_secs(self.cleanup_seconds)
    }

    pub fn handler(&self) -> Duration {
        Duration::from_secs(self.handler_seconds)
    }

    pub fn orchestrator(&self) -> OrchestratorTimeouts {
        OrchestratorTimeouts {
            provision: self.provision(),
            step: self.step(),
            cleanup: self.cleanup(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsystemConfig {
    pub worker_manager_enabled: bool,
    pub task_orchestrator_enabled: bool,
    pub step_dispatcher_enabled: bool,
}

impl Default for SubsystemConfig {
    fn default() -> Self {
        Self {
            worker_manager_enabled: true,
            task_orchestrator_enabled: true,
            step_dispatcher_enabled: true,
        }
    }
}

impl SubsystemConfig {
    pub fn any_enabled(&self) -> bool {
        self.worker_manager_enabled || self.task_orchestrator_enabled || self.step_dispatcher_enabled
    }
}

impl From<SubsystemConfig> for NodeSubsystems {
    fn from(config: SubsystemConfig) -> Self {
        Self {
            worker_manager: config.worker_manager_enabled,
            task_orchestrator: config.task_orchestrator_enabled,
            step_dispatcher: config.step_dispatcher_enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Register the `docker` provisioning backend
    pub enabled: bool,
    pub binary: String,
    pub host: Option<String>,
    pub default_image: Option<String>,
    pub worker_bin_path: String,
    pub worker_bus_url: String,
    pub readiness_timeout_seconds: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        let settings = DockerSettings::default();
        Self {
            enabled: false,
            binary: settings.binary,
            host: settings.host,
            default_image: settings.default_image,
            worker_bin_path: settings.worker_bin_path,
            worker_bus_url: settings.worker_bus_url,
            readiness_timeout_seconds: settings.readiness_timeout.as_secs(),
        }
    }
}

impl DockerConfig {
    pub fn settings(&self) -> DockerSettings {
        DockerSettings {
            binary: self.binary.clone(),
            host: self.host.clone(),
            default_image: self.default_image.clone(),
            worker_bin_path: self.worker_bin_path.clone(),
            worker_bus_url: self.worker_bus_url.clone(),
            readiness_timeout: Duration::from_secs(self.readiness_timeout_seconds),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Overrides `LOG_LEVEL` / `RUST_LOG` when set
    pub level: Option<String>,
}

impl RemoteMakeConfig {
    /// Reject values no node can run with
    pub fn validate(&self) -> ConfigResult<()> {
        let timeouts = [
            ("timeouts.provision_seconds", self.timeouts.provision_seconds),
            ("timeouts.task_seconds", self.timeouts.task_seconds),
            ("timeouts.step_seconds", self.timeouts.step_seconds),
            ("timeouts.cleanup_seconds", self.timeouts.cleanup_seconds),
            ("timeouts.handler_seconds", self.timeouts.handler_seconds),
        ];
        for (field, value) in timeouts {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    "0",
                    "timeouts must be at least one second",
                ));
            }
        }

        if self.bus.transport == BusTransport::Tcp && self.bus.url.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "bus.url",
                &self.bus.url,
                "the tcp transport needs a broker address",
            ));
        }

        if !self.subsystems.any_enabled() {
            return Err(ConfigurationError::invalid_value(
                "subsystems",
                "all disabled",
                "a node must run at least one subsystem",
            ));
        }

        if self.docker.enabled && self.docker.binary.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "docker.binary",
                &self.docker.binary,
                "the docker backend needs a docker executable",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = RemoteMakeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bus.transport, BusTransport::Memory);
        assert_eq!(config.timeouts.orchestrator(), OrchestratorTimeouts::default());
        assert!(!config.docker.enabled);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = RemoteMakeConfig::default();
        config.timeouts.step_seconds = 0;
        match config.validate() {
            Err(ConfigurationError::InvalidValue { field, .. }) => {
                assert_eq!(field, "timeouts.step_seconds")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_tcp_needs_url() {
        let mut config = RemoteMakeConfig::default();
        config.bus.transport = BusTransport::Tcp;
        config.bus.url = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_all_subsystems_disabled_rejected() {
        let mut config = RemoteMakeConfig::default();
        config.subsystems = SubsystemConfig {
            worker_manager_enabled: false,
            task_orchestrator_enabled: false,
            step_dispatcher_enabled: false,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_docker_settings_conversion() {
        let config = DockerConfig {
            default_image: Some("alpine:3".to_string()),
            readiness_timeout_seconds: 5,
            ..DockerConfig::default()
        };
        let settings = config.settings();
        assert_eq!(settings.default_image.as_deref(), Some("alpine:3"));
        assert_eq!(settings.readiness_timeout, Duration::from_secs(5));
    }
}
