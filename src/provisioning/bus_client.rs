use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::backend::WorkerLifecycle;
use crate::context::ExecutionContext;
use crate::errors::{OrchestratorError, PhaseFailure, PhaseResult};
use crate::messaging::{codec, subjects, MessageBus};
use crate::models::{Worker, WorkerTemplate};
use crate::node::NodeId;
use crate::state_machine::WorkerState;

/// Worker lifecycle calls addressed to another node's lifecycle manager
pub struct BusWorkerLifecycle {
    bus: Arc<dyn MessageBus>,
    target: NodeId,
    timeout: Duration,
}

impl std::fmt::Debug for BusWorkerLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusWorkerLifecycle")
            .field("target", &self.target)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BusWorkerLifecycle {
    pub fn new(bus: Arc<dyn MessageBus>, target: NodeId, timeout: Duration) -> Self {
        Self {
            bus,
            target,
            timeout,
        }
    }

    /// Send `payload` and decode the worker the remote manager replies with
    async fn call(
        &self,
        ctx: &ExecutionContext,
        subject: String,
        payload: Vec<u8>,
        fallback: Worker,
        accepted: fn(WorkerState) -> bool,
    ) -> PhaseResult<Worker> {
        debug!(subject = %subject, worker_id = %fallback.id, "Requesting worker lifecycle change");
        let reply = match self.bus.request(ctx, &subject, payload, self.timeout).await {
            Ok(reply) => reply,
            Err(e) => return Err(fallback.reject(OrchestratorError::from_messaging(&subject, e))),
        };

        let worker: Worker = match codec::decode(&reply) {
            Ok(worker) => worker,
            Err(e) => return Err(fallback.reject(OrchestratorError::transport(&subject, e.to_string()))),
        };

        if accepted(worker.state) {
            return Ok(worker);
        }

        let error = match &worker.last_error {
            Some(record) => OrchestratorError::Remote(record.clone()),
            None => OrchestratorError::backend_failed(
                worker.backend(),
                worker.id,
                subject,
                format!("remote manager returned worker in state {}", worker.state),
            ),
        };
        Err(PhaseFailure::new(worker, error))
    }
}

#[async_trait]
impl WorkerLifecycle for BusWorkerLifecycle {
    async fn provision(
        &self,
        ctx: &ExecutionContext,
        template: &WorkerTemplate,
    ) -> PhaseResult<Worker> {
        let fallback = Worker::new(template.clone());
        let payload = match codec::encode(template) {
            Ok(payload) => payload,
            Err(e) => {
                return Err(fallback.reject(OrchestratorError::invalid_template(template.id, e.to_string())))
            }
        };
        self.call(
            ctx,
            subjects::node_provision(self.target),
            payload,
            fallback,
            |state| state == WorkerState::Provisioned,
        )
        .await
    }

    async fn terminate(&self, ctx: &ExecutionContext, worker: Worker) -> PhaseResult<Worker> {
        let payload = match codec::encode(&worker) {
            Ok(payload) => payload,
            Err(e) => {
                let error = OrchestratorError::transport(subjects::node_terminate(self.target), e.to_string());
                return Err(worker.reject(error));
            }
        };
        self.call(
            ctx,
            subjects::node_terminate(self.target),
            payload,
            worker,
            // A worker that never held resources comes back unchanged
            |state| !state.is_error() && !state.holds_resources(),
        )
        .await
    }
}
