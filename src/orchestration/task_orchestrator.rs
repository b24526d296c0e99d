//! # Task Orchestrator
//!
//! Runs one task template end to end on a dedicated worker.
//!
//! ## Flow
//!
//! ```text
//! scheduled ──provision──> running ──step 1..N──> done ──cleanup──> done
//!     │                       │                     │
//!     └─ provision failed     └─ step failed ──┐    └─ terminate failed ──> error
//!        (no steps, no cleanup)                 └──> error ──cleanup──> error
//! ```
//!
//! Steps run strictly one after another in ascending `sequence_order`. A
//! process step runs on the node that owns the worker; a nested-task step runs
//! on this node, since a nested task only orchestrates. The first failing step
//! stops the loop; completed steps are not rolled back.
//!
//! Cleanup always runs once the worker was provisioned, under its own
//! bounded context, so a cancelled or expired caller cannot leak the worker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::errors::{OrchestratorError, OrchestratorResult, PhaseFailure, PhaseResult};
use crate::messaging::{codec, subjects, MessageBus};
use crate::models::{Step, StepKind, StepTemplate, Task, TaskTemplate, Worker};
use crate::node::NodeId;
use crate::provisioning::WorkerLifecycle;
use crate::state_machine::{LifecycleState, TaskEvent};

use super::step_dispatcher::StepDispatcher;
use super::task_starter::TaskStarter;

/// Per-phase time budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorTimeouts {
    pub provision: Duration,
    pub step: Duration,
    pub cleanup: Duration,
}

impl Default for OrchestratorTimeouts {
    fn default() -> Self {
        Self {
            provision: Duration::from_secs(360),
            step: Duration::from_secs(360),
            cleanup: Duration::from_secs(60),
        }
    }
}

pub struct TaskOrchestrator {
    node_id: NodeId,
    lifecycle: Arc<dyn WorkerLifecycle>,
    dispatcher: Arc<StepDispatcher>,
    bus: Arc<dyn MessageBus>,
    timeouts: OrchestratorTimeouts,
}

impl std::fmt::Debug for TaskOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskOrchestrator")
            .field("node_id", &self.node_id)
            .field("bus", &self.bus.provider_name())
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl TaskOrchestrator {
    pub fn new(
        node_id: NodeId,
        lifecycle: Arc<dyn WorkerLifecycle>,
        dispatcher: Arc<StepDispatcher>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            node_id,
            lifecycle,
            dispatcher,
            bus,
            timeouts: OrchestratorTimeouts::default(),
        }
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: OrchestratorTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn timeouts(&self) -> OrchestratorTimeouts {
        self.timeouts
    }

    /// Run `template` to a terminal state
    ///
    /// Both sides carry the realized task. On failure the error is the first
    /// one encountered; a cleanup error is reported only when everything
    /// before it succeeded, but it always leaves the task in `error`.
    pub async fn start(&self, ctx: &ExecutionContext, template: &TaskTemplate) -> PhaseResult<Task> {
        let mut task = Task::new(template);
        crate::log_task!(
            info,
            "Task scheduled",
            task_id: task.id,
            template_id: template.id,
            name: template.display_name(),
            steps: template.steps.len(),
        );

        let provision_ctx = ctx.child_with_timeout(self.timeouts.provision);
        match self.lifecycle.provision(&provision_ctx, &template.worker).await {
            Ok(worker) => task.worker = worker,
            Err(failure) => {
                let (worker, error) = failure.into_parts();
                task.worker = worker;
                crate::log_task!(warn, "Provisioning failed", task_id: task.id, error: error.to_string());
                return Err(task.reject(error));
            }
        }
        if !task.worker.is_provisioned() {
            let error = OrchestratorError::backend_failed(
                task.worker.backend(),
                task.worker.id,
                "provision",
                format!("worker came back in state {}", task.worker.state),
            );
            return Err(task.reject(error));
        }
        crate::log_worker!(
            debug,
            "Worker provisioned",
            worker_id: task.worker.id,
            backend: task.worker.backend(),
            node_id: task.worker.node_id,
        );

        let mut first_error = match task.transition(TaskEvent::Start) {
            Ok(_) => self.run_steps(ctx, template, &mut task).await.err(),
            Err(e) => Some(OrchestratorError::from(e)),
        };
        if first_error.is_none() {
            if let Err(e) = task.transition(TaskEvent::Complete) {
                first_error = Some(e.into());
            }
        }
        if let Some(error) = &first_error {
            task.fail(error);
        }

        let cleanup_ctx = ExecutionContext::with_timeout(self.timeouts.cleanup);
        let task = match self.cleanup(&cleanup_ctx, task).await {
            Ok(task) => task,
            Err(failure) => {
                let (task, cleanup_error) = failure.into_parts();
                if first_error.is_none() {
                    first_error = Some(cleanup_error);
                }
                task
            }
        };

        match first_error {
            None => {
                crate::log_task!(info, "Task completed", task_id: task.id, steps: task.steps.len());
                Ok(task)
            }
            Some(error) => {
                crate::log_task!(
                    warn,
                    "Task failed",
                    task_id: task.id,
                    steps: task.steps.len(),
                    error: error.to_string(),
                );
                Err(PhaseFailure::new(task, error))
            }
        }
    }

    /// Release the task's worker
    ///
    /// A no-op unless the worker is provisioned, so a second call on the same
    /// task does nothing. A failed termination forces the task into `error`.
    pub async fn cleanup(&self, ctx: &ExecutionContext, mut task: Task) -> PhaseResult<Task> {
        if !task.worker.is_provisioned() {
            debug!(task_id = %task.id, worker_state = %task.worker.state, "No worker to release");
            return Ok(task);
        }

        match self.lifecycle.terminate(ctx, task.worker.clone()).await {
            Ok(worker) => {
                crate::log_worker!(
                    debug,
                    "Worker released",
                    worker_id: worker.id,
                    backend: worker.backend(),
                    state: worker.state,
                );
                task.worker = worker;
                Ok(task)
            }
            Err(failure) => {
                let (worker, error) = failure.into_parts();
                let error = OrchestratorError::cleanup_failed(worker.id, error.to_string());
                crate::log_worker!(
                    error,
                    "Worker release failed",
                    worker_id: worker.id,
                    backend: worker.backend(),
                    task_id: task.id,
                    error: error.to_string(),
                );
                task.worker = worker;
                if task.state.accepts(&TaskEvent::CleanupFailed) {
                    let _ = task.transition(TaskEvent::CleanupFailed);
                }
                task.fail(&error);
                Err(PhaseFailure::new(task, error))
            }
        }
    }

    async fn run_steps(
        &self,
        ctx: &ExecutionContext,
        template: &TaskTemplate,
        task: &mut Task,
    ) -> OrchestratorResult<()> {
        for step_template in template.ordered_steps() {
            if let Err(interrupted) = ctx.check() {
                return Err(OrchestratorError::interrupted(
                    interrupted,
                    format!("task {}", task.id),
                    ctx.remaining(),
                ));
            }

            let result = self.dispatch_step(ctx, &task.worker, step_template).await;
            match result {
                Ok(step) => {
                    crate::log_step!(
                        debug,
                        "Step recorded",
                        step_id: step.id,
                        task_id: task.id,
                        sequence_order: step.sequence_order,
                    );
                    task.steps.push(step);
                }
                Err(failure) => {
                    let (step, error) = failure.into_parts();
                    task.steps.push(step);
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// Route a step to the node that must run it
    async fn dispatch_step(
        &self,
        ctx: &ExecutionContext,
        worker: &Worker,
        template: &StepTemplate,
    ) -> PhaseResult<Step> {
        let target = match template.kind {
            StepKind::Process => match worker.node_id {
                Some(node) => node,
                None => {
                    let error = OrchestratorError::backend_failed(
                        worker.backend(),
                        worker.id,
                        "locate",
                        "provisioned worker has no owning node",
                    );
                    return Err(Step::new(template).reject(error));
                }
            },
            StepKind::NestedTask | StepKind::Unsupported => self.node_id,
        };

        if target == self.node_id {
            let step_ctx = match template.kind {
                StepKind::Process => ctx.child_with_timeout(self.timeouts.step),
                _ => ctx.child(),
            };
            self.dispatcher.start_with(&step_ctx, template, self).await
        } else {
            self.dispatch_remote(ctx, target, template).await
        }
    }

    async fn dispatch_remote(
        &self,
        ctx: &ExecutionContext,
        target: NodeId,
        template: &StepTemplate,
    ) -> PhaseResult<Step> {
        let subject = subjects::step_start(target);
        let fallback = Step::new(template);

        let payload = match codec::encode(template) {
            Ok(payload) => payload,
            Err(e) => {
                return Err(fallback.reject(OrchestratorError::invalid_template(template.id, e.to_string())))
            }
        };

        debug!(subject = %subject, template_id = %template.id, "Dispatching step");
        let reply = match self.bus.request(ctx, &subject, payload, self.timeouts.step).await {
            Ok(reply) => reply,
            Err(e) => return Err(fallback.reject(OrchestratorError::from_messaging(&subject, e))),
        };

        let step: Step = match codec::decode(&reply) {
            Ok(step) => step,
            Err(e) => return Err(fallback.reject(OrchestratorError::transport(&subject, e.to_string()))),
        };

        if step.succeeded() {
            return Ok(step);
        }
        if step.state.is_error() {
            let record = step.last_error.clone().unwrap_or_else(|| {
                OrchestratorError::transport(&subject, "remote step failed without an error record")
                    .to_record()
            });
            let error = OrchestratorError::StepFailed {
                step_id: step.id,
                record,
            };
            return Err(PhaseFailure::new(step, error));
        }
        let error = OrchestratorError::transport(
            &subject,
            format!("remote step replied in non-terminal state {}", step.state),
        );
        Err(step.reject(error))
    }
}

#[async_trait]
impl TaskStarter for TaskOrchestrator {
    async fn start_task(&self, ctx: &ExecutionContext, template: &TaskTemplate) -> PhaseResult<Task> {
        self.start(ctx, template).await
    }
}
