//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use remote_make::context::ExecutionContext;
use remote_make::errors::{OrchestratorError, PhaseResult};
use remote_make::execution::LocalProcessRunner;
use remote_make::messaging::{MessageBus, SubscriptionId};
use remote_make::models::{TaskTemplate, Worker, WorkerTemplate};
use remote_make::node::NodeId;
use remote_make::orchestration::{
    BusTaskStarter, StepDispatcher, StepDispatcherSubscriber, TaskOrchestrator,
};
use remote_make::provisioning::{ProvisioningBackend, WorkerLifecycle, WorkerLifecycleManager};
use remote_make::state_machine::{WorkerEvent, WorkerState};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Backend that places workers on a fixed node and counts lifecycle calls
#[derive(Debug)]
pub struct RecordingBackend {
    pub node: NodeId,
    provisions: AtomicUsize,
    terminates: AtomicUsize,
    fail_terminate: AtomicBool,
}

impl RecordingBackend {
    pub const NAME: &'static str = "recording";

    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            provisions: AtomicUsize::new(0),
            terminates: AtomicUsize::new(0),
            fail_terminate: AtomicBool::new(false),
        }
    }

    pub fn failing_terminate(self) -> Self {
        self.fail_terminate.store(true, Ordering::SeqCst);
        self
    }

    pub fn provisions(&self) -> usize {
        self.provisions.load(Ordering::SeqCst)
    }

    pub fn terminates(&self) -> usize {
        self.terminates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProvisioningBackend for RecordingBackend {
    async fn provision(&self, _ctx: &ExecutionContext, mut worker: Worker) -> PhaseResult<Worker> {
        self.provisions.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = worker.transition(WorkerEvent::Provision) {
            return Err(worker.reject(e.into()));
        }
        worker.node_id = Some(self.node);
        if let Err(e) = worker.transition(WorkerEvent::Provisioned) {
            return Err(worker.reject(e.into()));
        }
        Ok(worker)
    }

    async fn terminate(&self, _ctx: &ExecutionContext, mut worker: Worker) -> PhaseResult<Worker> {
        if worker.state != WorkerState::Provisioned {
            return Ok(worker);
        }
        self.terminates.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = worker.transition(WorkerEvent::Terminate) {
            return Err(worker.reject(e.into()));
        }
        if self.fail_terminate.load(Ordering::SeqCst) {
            let error = OrchestratorError::backend_failed(
                Self::NAME,
                worker.id,
                "terminate",
                "environment refused to stop",
            );
            return Err(worker.reject(error));
        }
        if let Err(e) = worker.transition(WorkerEvent::Terminated) {
            return Err(worker.reject(e.into()));
        }
        Ok(worker)
    }
}

pub fn dispatcher(bus: Arc<dyn MessageBus>, node: NodeId) -> Arc<StepDispatcher> {
    Arc::new(StepDispatcher::new(
        node,
        Arc::new(LocalProcessRunner::new()),
        Arc::new(BusTaskStarter::new(bus, node, TEST_TIMEOUT)),
    ))
}

pub fn manager_with(backend: Arc<RecordingBackend>) -> Arc<WorkerLifecycleManager> {
    Arc::new(WorkerLifecycleManager::new().with_backend(RecordingBackend::NAME, backend))
}

/// Orchestrator on `node` driving workers through `lifecycle`
pub fn orchestrator(
    bus: Arc<dyn MessageBus>,
    node: NodeId,
    lifecycle: Arc<dyn WorkerLifecycle>,
) -> Arc<TaskOrchestrator> {
    Arc::new(TaskOrchestrator::new(
        node,
        lifecycle,
        dispatcher(bus.clone(), node),
        bus,
    ))
}

/// Serve `step.start` requests for `node`
pub async fn serve_steps(bus: Arc<dyn MessageBus>, node: NodeId) -> Vec<SubscriptionId> {
    Arc::new(StepDispatcherSubscriber::new(dispatcher(bus.clone(), node), TEST_TIMEOUT))
        .register(bus.as_ref())
        .await
        .expect("step dispatcher subscription")
}

/// One process step per command, in order
pub fn commands(backend: &str, commands: &[&str]) -> TaskTemplate {
    commands
        .iter()
        .fold(TaskTemplate::new(WorkerTemplate::new(backend)), |template, command| {
            template.with_command(*command)
        })
}
