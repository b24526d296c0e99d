//! # Request Subscribers
//!
//! Bus request handlers that expose a node's subsystems to other nodes.
//!
//! | Subject | Request | Reply |
//! |---------|---------|-------|
//! | `node.<id>.step.start` | [`StepTemplate`] | [`Step`] |
//! | `node.<id>.task.start` | [`TaskTemplate`] | [`Task`] |
//! | `node.<id>.node.provision` | [`WorkerTemplate`] | [`Worker`] |
//! | `node.<id>.node.terminate` | [`Worker`] | [`Worker`] |
//! | `node.<id>.ping` | empty | [`NodeStatus`] |
//!
//! Every request gets a reply. A payload that does not decode is answered
//! with an entity in `error` whose `last_error` describes the decode failure.
//! A reply too large for the bus is resent with process output cut down to
//! its tail and the entity in `error`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::context::ExecutionContext;
use crate::errors::{OrchestratorError, Realized};
use crate::messaging::{
    codec, handler, subjects, BusMessage, MessageBus, MessagingError, MessagingResult, SubscriptionId,
};
use crate::models::{Step, StepTemplate, Task, TaskTemplate, Worker, WorkerTemplate};
use crate::node::NodeStatus;
use crate::state_machine::{StepState, TaskState};
use crate::provisioning::WorkerLifecycle;

use super::step_dispatcher::StepDispatcher;
use super::task_orchestrator::TaskOrchestrator;

/// Bytes of stdout and stderr kept per process, tried in order, when a reply is too large
const REPLY_OUTPUT_BUDGETS: [usize; 2] = [64 * 1024, 0];

/// An entity sent as a reply
trait ReplyEntity: Serialize {
    /// Copy with process output cut to its last `keep` bytes and `error` recorded
    fn oversized(&self, keep: usize, error: &OrchestratorError) -> Self;
}

fn truncate_tail(text: &mut String, keep: usize) {
    if text.len() <= keep {
        return;
    }
    let mut start = text.len() - keep;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    *text = format!("[{start} bytes truncated]\n{}", &text[start..]);
}

fn truncate_step(step: &mut Step, keep: usize) {
    if let Some(process) = step.process.as_mut() {
        truncate_tail(&mut process.stdout, keep);
        truncate_tail(&mut process.stderr, keep);
    }
    if let Some(task) = step.task.as_mut() {
        truncate_task(task, keep);
    }
}

fn truncate_task(task: &mut Task, keep: usize) {
    for step in &mut task.steps {
        truncate_step(step, keep);
    }
}

impl ReplyEntity for Step {
    fn oversized(&self, keep: usize, error: &OrchestratorError) -> Self {
        let mut step = self.clone();
        truncate_step(&mut step, keep);
        if !step.state.is_error() {
            // The copy is a new record; it fails from scheduled
            step.state = StepState::Scheduled;
        }
        step.fail(error);
        step
    }
}

impl ReplyEntity for Task {
    fn oversized(&self, keep: usize, error: &OrchestratorError) -> Self {
        let mut task = self.clone();
        truncate_task(&mut task, keep);
        if !task.state.is_error() {
            task.state = TaskState::Scheduled;
        }
        task.fail(error);
        task
    }
}

impl ReplyEntity for Worker {
    fn oversized(&self, _keep: usize, error: &OrchestratorError) -> Self {
        let mut worker = self.clone();
        worker.fail(error);
        worker
    }
}

impl ReplyEntity for NodeStatus {
    fn oversized(&self, _keep: usize, _error: &OrchestratorError) -> Self {
        self.clone()
    }
}

/// Encode `entity` and answer `message`
async fn reply<T: ReplyEntity>(message: &BusMessage, entity: &T) {
    let payload = match codec::encode(entity) {
        Ok(payload) => payload,
        Err(e) => {
            error!(subject = %message.subject, error = %e, "Failed to encode reply");
            return;
        }
    };
    let (mut size_bytes, limit_bytes) = match message.respond(payload).await {
        Ok(()) => return,
        Err(MessagingError::MessageTooLarge {
            size_bytes,
            limit_bytes,
        }) => (size_bytes, limit_bytes),
        Err(e) => {
            warn!(subject = %message.subject, error = %e, "Failed to deliver reply");
            return;
        }
    };

    let error = OrchestratorError::transport(
        &message.subject,
        format!("reply of {size_bytes} bytes exceeds the {limit_bytes} byte bus limit, output truncated"),
    );
    for keep in REPLY_OUTPUT_BUDGETS {
        warn!(subject = %message.subject, size_bytes, limit_bytes, keep, "Reply too large, resending truncated");
        let payload = match codec::encode(&entity.oversized(keep, &error)) {
            Ok(payload) => payload,
            Err(e) => {
                error!(subject = %message.subject, error = %e, "Failed to encode reply");
                return;
            }
        };
        match message.respond(payload).await {
            Ok(()) => return,
            Err(MessagingError::MessageTooLarge { size_bytes: size, .. }) => size_bytes = size,
            Err(e) => {
                warn!(subject = %message.subject, error = %e, "Failed to deliver reply");
                return;
            }
        }
    }
    error!(subject = %message.subject, size_bytes, "Reply still too large after truncation, dropped");
}

fn decode_failure(payload: &[u8], reason: impl Into<String>) -> (uuid::Uuid, OrchestratorError) {
    let id = codec::recover_id(payload);
    (id, OrchestratorError::invalid_template(id, reason))
}

/// Serves `node.<id>.step.start`
pub struct StepDispatcherSubscriber {
    dispatcher: Arc<StepDispatcher>,
    handler_timeout: Duration,
}

impl StepDispatcherSubscriber {
    pub fn new(dispatcher: Arc<StepDispatcher>, handler_timeout: Duration) -> Self {
        Self {
            dispatcher,
            handler_timeout,
        }
    }

    pub async fn handle(&self, payload: &[u8]) -> Step {
        let template: StepTemplate = match codec::decode(payload) {
            Ok(template) => template,
            Err(e) => {
                let (id, error) = decode_failure(payload, e.to_string());
                return Step::rejected(id, &error);
            }
        };
        let ctx = ExecutionContext::with_timeout(self.handler_timeout);
        self.dispatcher.start(&ctx, &template).await.into_realized()
    }

    pub async fn register(self: Arc<Self>, bus: &dyn MessageBus) -> MessagingResult<Vec<SubscriptionId>> {
        let subject = subjects::step_start(self.dispatcher.node_id());
        let this = self.clone();
        let id = bus
            .subscribe(
                &subject,
                handler(move |message| {
                    let this = this.clone();
                    async move {
                        let step = this.handle(&message.payload).await;
                        reply(&message, &step).await;
                    }
                }),
            )
            .await?;
        debug!(subject = %subject, "Step dispatcher subscribed");
        Ok(vec![id])
    }
}

/// Serves `node.<id>.task.start`
pub struct TaskOrchestratorSubscriber {
    orchestrator: Arc<TaskOrchestrator>,
    handler_timeout: Duration,
}

impl TaskOrchestratorSubscriber {
    pub fn new(orchestrator: Arc<TaskOrchestrator>, handler_timeout: Duration) -> Self {
        Self {
            orchestrator,
            handler_timeout,
        }
    }

    pub async fn handle(&self, payload: &[u8]) -> Task {
        let template: TaskTemplate = match codec::decode(payload) {
            Ok(template) => template,
            Err(e) => {
                let (id, error) = decode_failure(payload, e.to_string());
                return Task::rejected(id, &error);
            }
        };
        let ctx = ExecutionContext::with_timeout(self.handler_timeout);
        self.orchestrator.start(&ctx, &template).await.into_realized()
    }

    pub async fn register(self: Arc<Self>, bus: &dyn MessageBus) -> MessagingResult<Vec<SubscriptionId>> {
        let subject = subjects::task_start(self.orchestrator.node_id());
        let this = self.clone();
        let id = bus
            .subscribe(
                &subject,
                handler(move |message| {
                    let this = this.clone();
                    async move {
                        let task = this.handle(&message.payload).await;
                        reply(&message, &task).await;
                    }
                }),
            )
            .await?;
        debug!(subject = %subject, "Task orchestrator subscribed");
        Ok(vec![id])
    }
}

/// Serves `node.<id>.node.provision` and `node.<id>.node.terminate`
pub struct WorkerLifecycleSubscriber {
    node_id: crate::node::NodeId,
    lifecycle: Arc<dyn WorkerLifecycle>,
    handler_timeout: Duration,
}

impl WorkerLifecycleSubscriber {
    pub fn new(
        node_id: crate::node::NodeId,
        lifecycle: Arc<dyn WorkerLifecycle>,
        handler_timeout: Duration,
    ) -> Self {
        Self {
            node_id,
            lifecycle,
            handler_timeout,
        }
    }

    pub async fn handle_provision(&self, payload: &[u8]) -> Worker {
        let template: WorkerTemplate = match codec::decode(payload) {
            Ok(template) => template,
            Err(e) => {
                let (id, error) = decode_failure(payload, e.to_string());
                return Worker::rejected(id, &error);
            }
        };
        let ctx = ExecutionContext::with_timeout(self.handler_timeout);
        self.lifecycle.provision(&ctx, &template).await.into_realized()
    }

    pub async fn handle_terminate(&self, payload: &[u8]) -> Worker {
        let worker: Worker = match codec::decode(payload) {
            Ok(worker) => worker,
            Err(e) => {
                // The payload was a worker, so its id is the worker's own
                let (id, error) = decode_failure(payload, e.to_string());
                let mut worker = Worker::rejected(uuid::Uuid::nil(), &error);
                worker.id = id;
                return worker;
            }
        };
        let ctx = ExecutionContext::with_timeout(self.handler_timeout);
        self.lifecycle.terminate(&ctx, worker).await.into_realized()
    }

    pub async fn register(self: Arc<Self>, bus: &dyn MessageBus) -> MessagingResult<Vec<SubscriptionId>> {
        let provision = self.clone();
        let provision_id = bus
            .subscribe(
                &subjects::node_provision(self.node_id),
                handler(move |message| {
                    let this = provision.clone();
                    async move {
                        let worker = this.handle_provision(&message.payload).await;
                        reply(&message, &worker).await;
                    }
                }),
            )
            .await?;

        let terminate = self.clone();
        let terminate_id = bus
            .subscribe(
                &subjects::node_terminate(self.node_id),
                handler(move |message| {
                    let this = terminate.clone();
                    async move {
                        let worker = this.handle_terminate(&message.payload).await;
                        reply(&message, &worker).await;
                    }
                }),
            )
            .await?;

        debug!(node_id = %self.node_id, "Worker lifecycle manager subscribed");
        Ok(vec![provision_id, terminate_id])
    }
}

/// Serves `node.<id>.ping`
pub struct NodeStatusSubscriber {
    status: NodeStatus,
}

impl NodeStatusSubscriber {
    pub fn new(status: NodeStatus) -> Self {
        Self { status }
    }

    pub fn status(&self) -> &NodeStatus {
        &self.status
    }

    pub async fn register(self: Arc<Self>, bus: &dyn MessageBus) -> MessagingResult<Vec<SubscriptionId>> {
        let this = self.clone();
        let id = bus
            .subscribe(
                &subjects::node_ping(self.status.node_id),
                handler(move |message| {
                    let this = this.clone();
                    async move {
                        reply(&message, &this.status).await;
                    }
                }),
            )
            .await?;
        Ok(vec![id])
    }
}
