use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::step::Step;
use super::templates::{TaskTemplate, WorkerTemplate};
use super::worker::Worker;
use crate::errors::{ErrorRecord, OrchestratorError, PhaseFailure};
use crate::state_machine::{LifecycleState, StateMachineResult, TaskEvent, TaskState, TransitionGuard};

/// One realized execution of a [`TaskTemplate`]
///
/// `steps` holds only the steps that were actually attempted, in execution
/// order. A task that failed on its k-th step holds exactly k steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub template_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub state: TaskState,
    pub worker: Worker,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorRecord>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// A scheduled task whose worker is not provisioned yet
    pub fn new(template: &TaskTemplate) -> Self {
        Self {
            id: Uuid::new_v4(),
            template_id: template.id,
            name: template.name.clone(),
            state: TaskState::Scheduled,
            worker: Worker::new(template.worker.clone()),
            steps: Vec::new(),
            last_error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// A task in `error` built from a request that could not be decoded
    pub fn rejected(template_id: Uuid, error: &OrchestratorError) -> Self {
        let mut task = Self::new(&TaskTemplate {
            id: template_id,
            name: None,
            is_atomic: false,
            is_concurrent: false,
            worker: WorkerTemplate::default(),
            steps: Vec::new(),
        });
        task.fail(error);
        task
    }

    pub fn transition(&mut self, event: TaskEvent) -> StateMachineResult<TaskState> {
        let target = TransitionGuard::apply(self.id, &mut self.state, event)?;
        if target.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
        Ok(target)
    }

    /// Move to `error` and record the cause; the first recorded error wins
    pub fn fail(&mut self, error: &OrchestratorError) {
        if self.state.accepts(&TaskEvent::Fail) {
            let _ = self.transition(TaskEvent::Fail);
        }
        if self.last_error.is_none() {
            self.last_error = Some(error.to_record());
        }
    }

    pub fn reject(mut self, error: OrchestratorError) -> PhaseFailure<Task> {
        self.fail(&error);
        PhaseFailure::new(self, error)
    }

    pub fn succeeded(&self) -> bool {
        self.state == TaskState::Done
    }

    /// Steps plus the steps of every nested task, depth first
    pub fn step_count_recursive(&self) -> usize {
        self.steps
            .iter()
            .map(|step| {
                1 + step
                    .task
                    .as_ref()
                    .map(|task| task.step_count_recursive())
                    .unwrap_or(0)
            })
            .sum()
    }
}
