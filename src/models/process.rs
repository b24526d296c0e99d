use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::templates::ProcessTemplate;
use crate::errors::{ErrorRecord, OrchestratorError, PhaseFailure};
use crate::state_machine::{
    LifecycleState, ProcessEvent, ProcessState, StateMachineResult, TransitionGuard,
};

/// One execution of a [`ProcessTemplate`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    pub id: Uuid,
    pub template_id: Uuid,
    pub command: String,
    #[serde(default)]
    pub state: ProcessState,
    /// Exit status; -1 when the command never ran or was killed by a signal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorRecord>,
}

impl Process {
    pub fn new(template: &ProcessTemplate) -> Self {
        Self {
            id: Uuid::new_v4(),
            template_id: template.id,
            command: template.command.clone(),
            state: ProcessState::Scheduled,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            last_error: None,
        }
    }

    pub fn transition(&mut self, event: ProcessEvent) -> StateMachineResult<ProcessState> {
        TransitionGuard::apply(self.id, &mut self.state, event)
    }

    pub fn fail(&mut self, error: &OrchestratorError) {
        if self.state.accepts(&ProcessEvent::Fail) {
            let _ = self.transition(ProcessEvent::Fail);
        }
        if self.last_error.is_none() {
            self.last_error = Some(error.to_record());
        }
    }

    pub fn reject(mut self, error: OrchestratorError) -> PhaseFailure<Process> {
        self.fail(&error);
        PhaseFailure::new(self, error)
    }

    pub fn succeeded(&self) -> bool {
        self.state == ProcessState::Done
    }
}
