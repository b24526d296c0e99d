//! # Node Bootstrap
//!
//! Builds a running node from [`RemoteMakeConfig`]: connects the bus, wires the
//! enabled subsystems and registers their request subscribers.
//!
//! ## Deployment shapes
//!
//! - **Master**: every subsystem enabled, usually with the embedded broker.
//! - **Docker worker**: step dispatcher only; started by the docker backend
//!   with `NODE_UUID`, `BUS_URL` and `STEP_RUNNER_ENABLED=true`.
//! - **Orchestrator without a manager**: worker lifecycle calls go over the
//!   bus to `node.manager_node`.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{BusTransport, ConfigurationError, RemoteMakeConfig};
use crate::context::ExecutionContext;
use crate::errors::PhaseResult;
use crate::execution::LocalProcessRunner;
use crate::messaging::{
    BrokerHandle, InMemoryMessageBus, MessageBus, MessagingError, SubscriptionId, TcpBroker,
    TcpMessageBus,
};
use crate::models::{Task, TaskTemplate};
use crate::node::{NodeIdentity, NodeStatus, NodeSubsystems};
use crate::orchestration::{
    BusTaskStarter, NodeStatusSubscriber, StepDispatcher, StepDispatcherSubscriber,
    TaskOrchestrator, TaskOrchestratorSubscriber, TaskStarter, WorkerLifecycleSubscriber,
};
use crate::provisioning::{
    BusWorkerLifecycle, DockerBackend, LocalBackend, WorkerLifecycle, WorkerLifecycleManager,
};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error("Task orchestrator needs a worker manager: enable it locally or set node.manager_node")]
    NoWorkerManager,

    #[error("Task orchestrator is not enabled on node {0}")]
    OrchestratorDisabled(String),
}

pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// A node with its subsystems running
pub struct NodeRuntime {
    identity: NodeIdentity,
    config: RemoteMakeConfig,
    bus: Arc<dyn MessageBus>,
    tcp_client: Option<Arc<TcpMessageBus>>,
    broker: Option<BrokerHandle>,
    manager: Option<Arc<WorkerLifecycleManager>>,
    dispatcher: Arc<StepDispatcher>,
    orchestrator: Option<Arc<TaskOrchestrator>>,
    status: NodeStatus,
    subscriptions: Vec<SubscriptionId>,
}

impl std::fmt::Debug for NodeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRuntime")
            .field("node_id", &self.identity.id)
            .field("bus", &self.bus.provider_name())
            .field("subsystems", &self.status.subsystems)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl NodeRuntime {
    /// Connect the configured bus and start a node under the process identity
    pub async fn bootstrap(config: RemoteMakeConfig) -> BootstrapResult<Self> {
        config.validate()?;
        let identity = NodeIdentity::process(config.node.node_id()).clone();

        match config.bus.transport {
            BusTransport::Memory => {
                let bus: Arc<dyn MessageBus> = Arc::new(InMemoryMessageBus::new());
                Self::start(config, identity, bus, None).await
            }
            BusTransport::Tcp => {
                let (broker, address) = if config.bus.embedded_broker {
                    let broker = TcpBroker::bind(&config.bus.url).await?.spawn()?;
                    let address = broker.local_addr().to_string();
                    info!(address = %address, "Embedded broker listening");
                    (Some(broker), address)
                } else {
                    (None, config.bus.url.clone())
                };
                let client = Arc::new(TcpMessageBus::connect(&address).await?);
                let bus: Arc<dyn MessageBus> = client.clone();
                let mut runtime = Self::start(config, identity, bus, broker).await?;
                runtime.tcp_client = Some(client);
                Ok(runtime)
            }
        }
    }

    /// Start a node on an existing bus
    pub async fn start(
        config: RemoteMakeConfig,
        identity: NodeIdentity,
        bus: Arc<dyn MessageBus>,
        broker: Option<BrokerHandle>,
    ) -> BootstrapResult<Self> {
        let node_id = identity.id;
        let subsystems: NodeSubsystems = config.subsystems.into();
        let timeouts = config.timeouts;
        let mut subscriptions = Vec::new();

        let manager = if subsystems.worker_manager {
            let manager = WorkerLifecycleManager::new()
                .with_backend(LocalBackend::NAME, Arc::new(LocalBackend::new(node_id)));
            if config.docker.enabled {
                let docker = DockerBackend::new(config.docker.settings()).with_readiness_probe(bus.clone());
                manager.register(DockerBackend::NAME, Arc::new(docker));
            }
            let manager = Arc::new(manager);
            let subscriber = Arc::new(WorkerLifecycleSubscriber::new(
                node_id,
                manager.clone(),
                timeouts.handler(),
            ));
            subscriptions.extend(subscriber.register(bus.as_ref()).await?);
            Some(manager)
        } else {
            None
        };

        // Nested steps that reach this node's dispatcher over the bus are
        // handed to an orchestrator: this node's, or the manager node's.
        let task_node = if subsystems.task_orchestrator {
            node_id
        } else {
            config.node.manager_node_id().unwrap_or(node_id)
        };
        let tasks: Arc<dyn TaskStarter> =
            Arc::new(BusTaskStarter::new(bus.clone(), task_node, timeouts.task()));
        let dispatcher = Arc::new(StepDispatcher::new(
            node_id,
            Arc::new(LocalProcessRunner::new()),
            tasks,
        ));
        if subsystems.step_dispatcher {
            let subscriber = Arc::new(StepDispatcherSubscriber::new(dispatcher.clone(), timeouts.handler()));
            subscriptions.extend(subscriber.register(bus.as_ref()).await?);
        }

        let orchestrator = if subsystems.task_orchestrator {
            let lifecycle: Arc<dyn WorkerLifecycle> = match (&manager, config.node.manager_node_id()) {
                (Some(manager), _) => manager.clone(),
                (None, Some(target)) => Arc::new(BusWorkerLifecycle::new(bus.clone(), target, timeouts.provision())),
                (None, None) => return Err(BootstrapError::NoWorkerManager),
            };
            let orchestrator = Arc::new(
                TaskOrchestrator::new(node_id, lifecycle, dispatcher.clone(), bus.clone())
                    .with_timeouts(timeouts.orchestrator()),
            );
            let subscriber = Arc::new(TaskOrchestratorSubscriber::new(orchestrator.clone(), timeouts.task()));
            subscriptions.extend(subscriber.register(bus.as_ref()).await?);
            Some(orchestrator)
        } else {
            None
        };

        let status = NodeStatus {
            node_id,
            started_at: identity.started_at,
            subsystems,
            backends: manager
                .as_ref()
                .map(|manager| manager.backend_names())
                .unwrap_or_default(),
        };
        subscriptions.extend(
            Arc::new(NodeStatusSubscriber::new(status.clone()))
                .register(bus.as_ref())
                .await?,
        );

        info!(
            node_id = %node_id,
            bus = bus.provider_name(),
            worker_manager = subsystems.worker_manager,
            task_orchestrator = subsystems.task_orchestrator,
            step_dispatcher = subsystems.step_dispatcher,
            backends = ?status.backends,
            "Node started"
        );

        Ok(Self {
            identity,
            config,
            bus,
            tcp_client: None,
            broker,
            manager,
            dispatcher,
            orchestrator,
            status,
            subscriptions,
        })
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn config(&self) -> &RemoteMakeConfig {
        &self.config
    }

    pub fn bus(&self) -> Arc<dyn MessageBus> {
        self.bus.clone()
    }

    pub fn status(&self) -> &NodeStatus {
        &self.status
    }

    pub fn manager(&self) -> Option<&Arc<WorkerLifecycleManager>> {
        self.manager.as_ref()
    }

    pub fn dispatcher(&self) -> &Arc<StepDispatcher> {
        &self.dispatcher
    }

    pub fn orchestrator(&self) -> Option<&Arc<TaskOrchestrator>> {
        self.orchestrator.as_ref()
    }

    /// Run a task on this node's orchestrator under the configured task budget
    pub async fn run_task(&self, template: &TaskTemplate) -> BootstrapResult<PhaseResult<Task>> {
        let orchestrator = self
            .orchestrator
            .as_ref()
            .ok_or_else(|| BootstrapError::OrchestratorDisabled(self.identity.id.to_string()))?;
        let ctx = ExecutionContext::with_timeout(self.config.timeouts.task());
        Ok(orchestrator.start(&ctx, template).await)
    }

    /// Drop subscriptions, disconnect and stop the embedded broker
    pub async fn shutdown(self) {
        for id in &self.subscriptions {
            if let Err(e) = self.bus.unsubscribe(*id).await {
                warn!(subscription = %id, error = %e, "Failed to unsubscribe during shutdown");
            }
        }
        if let Some(client) = &self.tcp_client {
            client.close();
        }
        if let Some(broker) = self.broker {
            broker.shutdown().await;
        }
        info!(node_id = %self.identity.id, "Node stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubsystemConfig;
    use crate::node::NodeId;
    use crate::state_machine::{TaskState, WorkerState};
    use crate::models::WorkerTemplate;

    async fn memory_node(config: RemoteMakeConfig) -> BootstrapResult<NodeRuntime> {
        let bus: Arc<dyn MessageBus> = Arc::new(InMemoryMessageBus::new());
        NodeRuntime::start(config, NodeIdentity::generate(), bus, None).await
    }

    #[tokio::test]
    async fn test_full_node_runs_task() {
        let node = memory_node(RemoteMakeConfig::default()).await.unwrap();
        assert_eq!(node.status().backends, vec!["local".to_string()]);

        let template = TaskTemplate::new(WorkerTemplate::new("local")).with_command("echo hi");
        let task = node.run_task(&template).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Done);
        assert_eq!(task.worker.state, WorkerState::Terminated);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_orchestrator_without_manager_is_rejected() {
        let mut config = RemoteMakeConfig::default();
        config.subsystems.worker_manager_enabled = false;
        let result = memory_node(config).await;
        assert!(matches!(result, Err(BootstrapError::NoWorkerManager)));
    }

    #[tokio::test]
    async fn test_step_only_node_refuses_tasks() {
        let mut config = RemoteMakeConfig::default();
        config.subsystems = SubsystemConfig {
            worker_manager_enabled: false,
            task_orchestrator_enabled: false,
            step_dispatcher_enabled: true,
        };
        config.node.manager_node = Some(NodeId::new().as_uuid());
        let node = memory_node(config).await.unwrap();
        assert!(node.orchestrator().is_none());
        assert!(node.manager().is_none());

        let template = TaskTemplate::new(WorkerTemplate::new("local"));
        assert!(matches!(
            node.run_task(&template).await,
            Err(BootstrapError::OrchestratorDisabled(_))
        ));
    }
}
