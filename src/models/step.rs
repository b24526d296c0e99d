use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::process::Process;
use super::task::Task;
use super::templates::{StepKind, StepTemplate};
use crate::errors::{ErrorRecord, OrchestratorError, PhaseFailure};
use crate::node::NodeId;
use crate::state_machine::{LifecycleState, StateMachineResult, StepEvent, StepState, TransitionGuard};

/// One execution of a [`StepTemplate`]
///
/// Holds at most one of `process` or `task`, matching the template kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub template_id: Uuid,
    #[serde(default)]
    pub sequence_order: i64,
    pub kind: StepKind,
    #[serde(default)]
    pub state: StepState,
    /// Node whose dispatcher ran the step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<Process>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Box<Task>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorRecord>,
}

impl Step {
    pub fn new(template: &StepTemplate) -> Self {
        Self {
            id: Uuid::new_v4(),
            template_id: template.id,
            sequence_order: template.sequence_order,
            kind: template.kind,
            state: StepState::Scheduled,
            node_id: None,
            process: None,
            task: None,
            last_error: None,
        }
    }

    /// A step in `error` built from a request that could not be decoded
    pub fn rejected(template_id: Uuid, error: &OrchestratorError) -> Self {
        let mut step = Self {
            id: Uuid::new_v4(),
            template_id,
            sequence_order: 0,
            kind: StepKind::Unsupported,
            state: StepState::Scheduled,
            node_id: None,
            process: None,
            task: None,
            last_error: None,
        };
        step.fail(error);
        step
    }

    pub fn transition(&mut self, event: StepEvent) -> StateMachineResult<StepState> {
        TransitionGuard::apply(self.id, &mut self.state, event)
    }

    pub fn fail(&mut self, error: &OrchestratorError) {
        if self.state.accepts(&StepEvent::Fail) {
            let _ = self.transition(StepEvent::Fail);
        }
        if self.last_error.is_none() {
            self.last_error = Some(error.to_record());
        }
    }

    pub fn reject(mut self, error: OrchestratorError) -> PhaseFailure<Step> {
        self.fail(&error);
        PhaseFailure::new(self, error)
    }

    /// Complete the step, or fail it if the state does not permit completion
    pub fn complete(mut self) -> Result<Step, PhaseFailure<Step>> {
        match self.transition(StepEvent::Complete) {
            Ok(_) => Ok(self),
            Err(err) => Err(self.reject(err.into())),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == StepState::Done
    }
}
