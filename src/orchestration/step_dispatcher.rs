//! # Step Dispatcher
//!
//! Runs one step on this node. Every node runs a dispatcher, the master included.
//!
//! ## Branches
//!
//! - **Process**: the command runs through the [`ProcessRunner`]. A failed run
//!   still attaches the process, so exit code and output travel with the step.
//! - **Nested task**: the embedded template runs through a [`TaskStarter`]; the
//!   realized task is attached to the step whether it succeeded or not.
//!
//! A template whose kind and payload disagree fails with an unsupported-step
//! error before anything runs.

use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::errors::{ErrorKind, OrchestratorError, PhaseResult};
use crate::execution::ProcessRunner;
use crate::models::{Step, StepPayload, StepTemplate};
use crate::node::NodeId;
use crate::state_machine::StepEvent;

use super::task_starter::TaskStarter;

pub struct StepDispatcher {
    node_id: NodeId,
    runner: Arc<dyn ProcessRunner>,
    tasks: Arc<dyn TaskStarter>,
}

impl std::fmt::Debug for StepDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDispatcher")
            .field("node_id", &self.node_id)
            .finish()
    }
}

impl StepDispatcher {
    /// `tasks` runs nested-task steps that arrive over the bus
    pub fn new(node_id: NodeId, runner: Arc<dyn ProcessRunner>, tasks: Arc<dyn TaskStarter>) -> Self {
        Self {
            node_id,
            runner,
            tasks,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Run `template` to a terminal state
    pub async fn start(&self, ctx: &ExecutionContext, template: &StepTemplate) -> PhaseResult<Step> {
        self.start_with(ctx, template, self.tasks.as_ref()).await
    }

    /// Run `template`, starting nested tasks through `tasks`
    pub async fn start_with(
        &self,
        ctx: &ExecutionContext,
        template: &StepTemplate,
        tasks: &dyn TaskStarter,
    ) -> PhaseResult<Step> {
        let mut step = Step::new(template);
        step.node_id = Some(self.node_id);

        let payload = match template.payload() {
            Ok(payload) => payload,
            Err(error) => {
                crate::log_step!(warn, "Rejected unsupported step", step_id: step.id, template_id: template.id, kind: template.kind);
                return Err(step.reject(error));
            }
        };

        if let Err(e) = step.transition(StepEvent::Start) {
            return Err(step.reject(e.into()));
        }
        crate::log_step!(debug, "Step started", step_id: step.id, template_id: template.id, node_id: self.node_id);

        let result = match payload {
            StepPayload::Process(process_template) => {
                match self.runner.run(ctx, process_template).await {
                    Ok(process) => {
                        step.process = Some(process);
                        step.complete()
                    }
                    Err(failure) => {
                        let (process, error) = failure.into_parts();
                        step.process = Some(process);
                        Err(step.reject(error))
                    }
                }
            }
            StepPayload::NestedTask(task_template) => match tasks.start_task(ctx, task_template).await {
                Ok(task) if !task.state.is_error() => {
                    step.task = Some(Box::new(task));
                    step.complete()
                }
                Ok(task) => {
                    let error = nested_failure(task.id, task.last_error.clone(), None);
                    step.task = Some(Box::new(task));
                    Err(step.reject(error))
                }
                Err(failure) => {
                    let (task, error) = failure.into_parts();
                    let error = nested_failure(task.id, task.last_error.clone(), Some(error));
                    step.task = Some(Box::new(task));
                    Err(step.reject(error))
                }
            },
        };

        match &result {
            Ok(step) => {
                crate::log_step!(info, "Step completed", step_id: step.id, template_id: step.template_id,);
            }
            Err(failure) => {
                crate::log_step!(
                    warn,
                    "Step failed",
                    step_id: failure.entity.id,
                    template_id: failure.entity.template_id,
                    error: failure.error.to_string(),
                );
            }
        }
        result
    }
}

/// Error for a step whose nested task ended in `error`
///
/// Interruptions keep their own kind so a timed-out child still reads as a timeout.
fn nested_failure(
    task_id: uuid::Uuid,
    record: Option<crate::errors::ErrorRecord>,
    error: Option<OrchestratorError>,
) -> OrchestratorError {
    if let Some(error) = &error {
        if matches!(error.kind(), ErrorKind::Timeout | ErrorKind::Cancelled) {
            return error.clone();
        }
    }
    let record = record
        .or_else(|| error.as_ref().map(OrchestratorError::to_record))
        .unwrap_or_else(|| {
            crate::errors::ErrorRecord::new(ErrorKind::Execution, "nested task failed without an error record")
        });
    OrchestratorError::NestedTaskFailed { task_id, record }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{PhaseFailure, Realized};
    use crate::execution::LocalProcessRunner;
    use crate::models::{ProcessTemplate, StepKind, Task, TaskTemplate, WorkerTemplate};
    use crate::state_machine::{StepState, TaskEvent, TaskState};
    use async_trait::async_trait;

    /// Completes every task without running its steps, or fails all of them
    struct StubStarter {
        fail: bool,
    }

    #[async_trait]
    impl TaskStarter for StubStarter {
        async fn start_task(&self, _ctx: &ExecutionContext, template: &TaskTemplate) -> PhaseResult<Task> {
            let mut task = Task::new(template);
            if self.fail {
                return Err(task.reject(OrchestratorError::unknown_backend("gpu-cluster")));
            }
            task.transition(TaskEvent::Start).unwrap();
            task.transition(TaskEvent::Complete).unwrap();
            Ok(task)
        }
    }

    fn dispatcher(fail_nested: bool) -> StepDispatcher {
        StepDispatcher::new(
            NodeId::new(),
            Arc::new(LocalProcessRunner::new()),
            Arc::new(StubStarter { fail: fail_nested }),
        )
    }

    #[tokio::test]
    async fn test_process_step_done() {
        let dispatcher = dispatcher(false);
        let template = StepTemplate::process(1, ProcessTemplate::new("echo hi"));
        let step = dispatcher
            .start(&ExecutionContext::background(), &template)
            .await
            .unwrap();

        assert_eq!(step.state, StepState::Done);
        assert_eq!(step.node_id, Some(dispatcher.node_id()));
        let process = step.process.unwrap();
        assert_eq!(process.stdout, "hi\n");
        assert_eq!(process.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_failed_process_is_attached() {
        let template = StepTemplate::process(1, ProcessTemplate::new("echo oops >&2; exit 4"));
        let failure = dispatcher(false)
            .start(&ExecutionContext::background(), &template)
            .await
            .unwrap_err();

        assert_eq!(failure.kind(), ErrorKind::Execution);
        assert_eq!(failure.entity.state, StepState::Error);
        let process = failure.entity.process.as_ref().unwrap();
        assert_eq!(process.exit_code, Some(4));
        assert_eq!(process.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_empty_template_is_unsupported() {
        let mut template = StepTemplate::process(1, ProcessTemplate::new("true"));
        template.process = None;
        let failure = dispatcher(false)
            .start(&ExecutionContext::background(), &template)
            .await
            .unwrap_err();

        assert_eq!(failure.kind(), ErrorKind::Configuration);
        assert_eq!(failure.entity.state, StepState::Error);
        assert!(failure.entity.process.is_none());
    }

    #[tokio::test]
    async fn test_unknown_kind_is_unsupported() {
        let mut template = StepTemplate::process(1, ProcessTemplate::new("true"));
        template.kind = StepKind::Unsupported;
        let result = dispatcher(false)
            .start(&ExecutionContext::background(), &template)
            .await;
        assert!(matches!(
            result.phase_error(),
            Some(OrchestratorError::UnsupportedStep { .. })
        ));
    }

    #[tokio::test]
    async fn test_nested_task_attached() {
        let nested = TaskTemplate::new(WorkerTemplate::new("local")).with_command("true");
        let template = StepTemplate::nested(1, nested.clone());
        let step = dispatcher(false)
            .start(&ExecutionContext::background(), &template)
            .await
            .unwrap();

        assert_eq!(step.state, StepState::Done);
        let task = step.task.unwrap();
        assert_eq!(task.template_id, nested.id);
        assert_eq!(task.state, TaskState::Done);
    }

    #[tokio::test]
    async fn test_nested_failure_fails_step() {
        let nested = TaskTemplate::new(WorkerTemplate::new("gpu-cluster"));
        let template = StepTemplate::nested(1, nested);
        let PhaseFailure { entity, error } = dispatcher(true)
            .start(&ExecutionContext::background(), &template)
            .await
            .unwrap_err();

        assert_eq!(entity.state, StepState::Error);
        assert_eq!(entity.task.as_ref().unwrap().state, TaskState::Error);
        match error {
            OrchestratorError::NestedTaskFailed { record, .. } => {
                assert_eq!(record.kind, ErrorKind::Configuration);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_timed_out_process_keeps_timeout_kind() {
        let template = StepTemplate::process(1, ProcessTemplate::new("sleep 5"));
        let ctx = ExecutionContext::with_timeout(std::time::Duration::from_millis(100));
        let failure = dispatcher(false).start(&ctx, &template).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::Timeout);
        assert_eq!(failure.entity.state, StepState::Error);
    }
}
