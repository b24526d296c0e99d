use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::templates::WorkerTemplate;
use crate::errors::{ErrorRecord, OrchestratorError, PhaseFailure};
use crate::node::NodeId;
use crate::state_machine::{
    LifecycleState, StateMachineResult, TransitionGuard, WorkerEvent, WorkerState,
};

/// A realized execution environment owned by exactly one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: Uuid,
    pub template: WorkerTemplate,
    #[serde(default)]
    pub state: WorkerState,
    /// Node that owns the environment once provisioned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorRecord>,
}

impl Worker {
    pub fn new(template: WorkerTemplate) -> Self {
        Self {
            id: Uuid::new_v4(),
            template,
            state: WorkerState::Scheduled,
            node_id: None,
            last_error: None,
        }
    }

    /// A worker in `error` built from a request that could not be decoded
    pub fn rejected(template_id: Uuid, error: &OrchestratorError) -> Self {
        let mut worker = Self::new(WorkerTemplate {
            id: template_id,
            ..WorkerTemplate::default()
        });
        worker.fail(error);
        worker
    }

    pub fn backend(&self) -> &str {
        &self.template.backend
    }

    pub fn is_provisioned(&self) -> bool {
        self.state == WorkerState::Provisioned
    }

    pub fn transition(&mut self, event: WorkerEvent) -> StateMachineResult<WorkerState> {
        TransitionGuard::apply(self.id, &mut self.state, event)
    }

    /// Move to `error` when the current state permits it and record the cause
    pub fn fail(&mut self, error: &OrchestratorError) {
        if self.state.accepts(&WorkerEvent::Fail) {
            let _ = self.transition(WorkerEvent::Fail);
        }
        if self.last_error.is_none() {
            self.last_error = Some(error.to_record());
        }
    }

    /// Fail and package as a phase failure
    pub fn reject(mut self, error: OrchestratorError) -> PhaseFailure<Worker> {
        self.fail(&error);
        PhaseFailure::new(self, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_reject_from_scheduled() {
        let worker = Worker::new(WorkerTemplate::new("gpu-cluster"));
        let failure = worker.reject(OrchestratorError::unknown_backend("gpu-cluster"));
        assert_eq!(failure.entity.state, WorkerState::Error);
        assert_eq!(
            failure.entity.last_error.as_ref().unwrap().kind,
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_fail_on_terminal_state_only_records() {
        let mut worker = Worker::new(WorkerTemplate::new("local"));
        worker.transition(WorkerEvent::Provision).unwrap();
        worker.transition(WorkerEvent::Provisioned).unwrap();
        worker.transition(WorkerEvent::Terminate).unwrap();
        worker.transition(WorkerEvent::Terminated).unwrap();

        worker.fail(&OrchestratorError::cancelled("terminate"));
        assert_eq!(worker.state, WorkerState::Terminated);
        assert!(worker.last_error.is_some());
    }

    #[test]
    #[should_panic(expected = "lifecycle violation")]
    fn test_invalid_transition_panics_in_debug() {
        let mut worker = Worker::new(WorkerTemplate::new("local"));
        let _ = worker.transition(WorkerEvent::Terminated);
    }
}
