use async_trait::async_trait;
use tracing::{debug, info};

use super::backend::ProvisioningBackend;
use crate::context::ExecutionContext;
use crate::errors::{OrchestratorError, PhaseResult};
use crate::models::Worker;
use crate::node::NodeId;
use crate::state_machine::{WorkerEvent, WorkerState};

/// Runs workers on the current node; nothing is allocated
#[derive(Debug, Clone, Copy)]
pub struct LocalBackend {
    node_id: NodeId,
}

impl LocalBackend {
    pub const NAME: &'static str = "local";

    pub fn new(node_id: NodeId) -> Self {
        Self { node_id }
    }
}

#[async_trait]
impl ProvisioningBackend for LocalBackend {
    async fn provision(&self, _ctx: &ExecutionContext, mut worker: Worker) -> PhaseResult<Worker> {
        if let Err(e) = worker.transition(WorkerEvent::Provision) {
            return Err(worker.reject(e.into()));
        }
        worker.node_id = Some(self.node_id);
        if let Err(e) = worker.transition(WorkerEvent::Provisioned) {
            return Err(worker.reject(e.into()));
        }
        info!(worker_id = %worker.id, node_id = %self.node_id, "Provisioned local worker");
        Ok(worker)
    }

    async fn terminate(&self, _ctx: &ExecutionContext, mut worker: Worker) -> PhaseResult<Worker> {
        if worker.state != WorkerState::Provisioned {
            debug!(worker_id = %worker.id, state = %worker.state, "Nothing to terminate");
            return Ok(worker);
        }
        if let Err(e) = worker.transition(WorkerEvent::Terminate) {
            return Err(worker.reject(e.into()));
        }
        if worker.node_id != Some(self.node_id) {
            let owner = worker
                .node_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "none".to_string());
            let error = OrchestratorError::backend_failed(
                Self::NAME,
                worker.id,
                "terminate",
                format!("worker is owned by node {owner}, not {}", self.node_id),
            );
            return Err(worker.reject(error));
        }
        if let Err(e) = worker.transition(WorkerEvent::Terminated) {
            return Err(worker.reject(e.into()));
        }
        info!(worker_id = %worker.id, node_id = %self.node_id, "Terminated local worker");
        Ok(worker)
    }
}
