use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::errors::PhaseResult;
use crate::models::{Worker, WorkerTemplate};

/// A named way of bringing worker environments into existence
///
/// `provision` receives a `scheduled` worker and returns it `provisioned` with
/// its owning node set. `terminate` must be safe on a worker that never finished
/// provisioning: such a call is a no-op that returns the worker unchanged.
#[async_trait]
pub trait ProvisioningBackend: Send + Sync + 'static {
    async fn provision(&self, ctx: &ExecutionContext, worker: Worker) -> PhaseResult<Worker>;

    async fn terminate(&self, ctx: &ExecutionContext, worker: Worker) -> PhaseResult<Worker>;
}

/// Uniform provision/terminate contract used by the orchestrator
///
/// Implemented in-process by the lifecycle manager and remotely by the bus client.
#[async_trait]
pub trait WorkerLifecycle: Send + Sync + 'static {
    async fn provision(
        &self,
        ctx: &ExecutionContext,
        template: &WorkerTemplate,
    ) -> PhaseResult<Worker>;

    async fn terminate(&self, ctx: &ExecutionContext, worker: Worker) -> PhaseResult<Worker>;
}
