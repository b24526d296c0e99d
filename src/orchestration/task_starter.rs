//! # Task Starter
//!
//! The seam a step dispatcher uses to run a nested task. In-process it is the
//! [`TaskOrchestrator`](super::TaskOrchestrator) itself; on a node without a
//! local orchestrator it is [`BusTaskStarter`], which forwards the template to
//! `node.<id>.task.start`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::errors::{OrchestratorError, PhaseFailure, PhaseResult};
use crate::messaging::{codec, subjects, MessageBus};
use crate::models::{Task, TaskTemplate};
use crate::node::NodeId;

#[async_trait]
pub trait TaskStarter: Send + Sync {
    /// Run `template` to a terminal state
    async fn start_task(&self, ctx: &ExecutionContext, template: &TaskTemplate) -> PhaseResult<Task>;
}

/// Starts tasks on another node's orchestrator over the bus
pub struct BusTaskStarter {
    bus: Arc<dyn MessageBus>,
    target: NodeId,
    timeout: Duration,
}

impl std::fmt::Debug for BusTaskStarter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusTaskStarter")
            .field("target", &self.target)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BusTaskStarter {
    pub fn new(bus: Arc<dyn MessageBus>, target: NodeId, timeout: Duration) -> Self {
        Self {
            bus,
            target,
            timeout,
        }
    }
}

#[async_trait]
impl TaskStarter for BusTaskStarter {
    async fn start_task(&self, ctx: &ExecutionContext, template: &TaskTemplate) -> PhaseResult<Task> {
        let subject = subjects::task_start(self.target);
        let fallback = Task::new(template);

        let payload = match codec::encode(template) {
            Ok(payload) => payload,
            Err(e) => {
                return Err(fallback.reject(OrchestratorError::invalid_template(template.id, e.to_string())))
            }
        };

        debug!(subject = %subject, template_id = %template.id, "Forwarding nested task");
        let reply = match self.bus.request(ctx, &subject, payload, self.timeout).await {
            Ok(reply) => reply,
            Err(e) => return Err(fallback.reject(OrchestratorError::from_messaging(&subject, e))),
        };

        let task: Task = match codec::decode(&reply) {
            Ok(task) => task,
            Err(e) => return Err(fallback.reject(OrchestratorError::transport(&subject, e.to_string()))),
        };

        if !task.state.is_error() {
            return Ok(task);
        }
        let error = match &task.last_error {
            Some(record) => OrchestratorError::Remote(record.clone()),
            None => OrchestratorError::NestedTaskFailed {
                task_id: task.id,
                record: OrchestratorError::transport(&subject, "remote task failed without an error record")
                    .to_record(),
            },
        };
        Err(PhaseFailure::new(task, error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, Realized};
    use crate::messaging::{handler, InMemoryMessageBus};
    use crate::models::WorkerTemplate;
    use crate::state_machine::TaskState;

    #[tokio::test]
    async fn test_no_orchestrator_is_transport_error() {
        let bus: Arc<dyn MessageBus> = Arc::new(InMemoryMessageBus::new());
        let starter = BusTaskStarter::new(bus, NodeId::new(), Duration::from_secs(1));
        let template = TaskTemplate::new(WorkerTemplate::new("local")).with_command("true");

        let result = starter
            .start_task(&ExecutionContext::background(), &template)
            .await;
        assert_eq!(result.phase_error().map(|e| e.kind()), Some(ErrorKind::Transport));
        let task = result.into_realized();
        assert_eq!(task.state, TaskState::Error);
        assert_eq!(task.template_id, template.id);
        assert!(task.steps.is_empty());
    }

    #[tokio::test]
    async fn test_remote_error_keeps_remote_record() {
        let bus = InMemoryMessageBus::new();
        let node = NodeId::new();
        bus.subscribe(
            &subjects::task_start(node),
            handler(|message| async move {
                let template: TaskTemplate = codec::decode(&message.payload).unwrap();
                let task = Task::rejected(template.id, &OrchestratorError::unknown_backend("gpu-cluster"));
                message.respond(codec::encode(&task).unwrap()).await.unwrap();
            }),
        )
        .await
        .unwrap();

        let starter = BusTaskStarter::new(Arc::new(bus), node, Duration::from_secs(1));
        let template = TaskTemplate::new(WorkerTemplate::new("gpu-cluster"));
        let failure = starter
            .start_task(&ExecutionContext::background(), &template)
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::Configuration);
        assert_eq!(failure.entity.template_id, template.id);
    }
}
