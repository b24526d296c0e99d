use super::errors::{invalid_transition, StateMachineResult};
use super::events::TaskEvent;
use super::guards::LifecycleState;
use super::states::TaskState;

impl LifecycleState for TaskState {
    type Event = TaskEvent;

    const ENTITY: &'static str = "task";

    fn determine_target_state(self, event: &TaskEvent) -> StateMachineResult<TaskState> {
        use TaskEvent::*;
        use TaskState::*;

        let target = match (self, event) {
            (Scheduled, Start) => Running,
            (Running, Complete) => Done,

            // Provisioning failure never reaches running
            (Scheduled, Fail) => Error,
            (Running, Fail) => Error,

            // Cleanup runs after the task settles
            (Done, CleanupFailed) => Error,
            (Error, CleanupFailed) => Error,

            _ => return Err(invalid_transition(Self::ENTITY, self, event)),
        };

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let running = TaskState::Scheduled
            .determine_target_state(&TaskEvent::Start)
            .unwrap();
        assert_eq!(running, TaskState::Running);
        let done = running.determine_target_state(&TaskEvent::Complete).unwrap();
        assert_eq!(done, TaskState::Done);
    }

    #[test]
    fn test_failure_edges() {
        assert_eq!(
            TaskState::Scheduled
                .determine_target_state(&TaskEvent::Fail)
                .unwrap(),
            TaskState::Error
        );
        assert_eq!(
            TaskState::Running
                .determine_target_state(&TaskEvent::Fail)
                .unwrap(),
            TaskState::Error
        );
        assert_eq!(
            TaskState::Done
                .determine_target_state(&TaskEvent::CleanupFailed)
                .unwrap(),
            TaskState::Error
        );
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(TaskState::Scheduled
            .determine_target_state(&TaskEvent::Complete)
            .is_err());
        assert!(TaskState::Done
            .determine_target_state(&TaskEvent::Start)
            .is_err());
        assert!(TaskState::Done
            .determine_target_state(&TaskEvent::Fail)
            .is_err());
        assert!(!TaskState::Running.accepts(&TaskEvent::CleanupFailed));
    }
}
