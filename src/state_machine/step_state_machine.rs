use super::errors::{invalid_transition, StateMachineResult};
use super::events::{ProcessEvent, StepEvent};
use super::guards::LifecycleState;
use super::states::{ProcessState, StepState};

impl LifecycleState for StepState {
    type Event = StepEvent;

    const ENTITY: &'static str = "step";

    fn determine_target_state(self, event: &StepEvent) -> StateMachineResult<StepState> {
        use StepEvent::*;
        use StepState::*;

        let target = match (self, event) {
            (Scheduled, Start) => Running,
            (Running, Complete) => Done,
            (Running, Fail) => Error,
            // Template rejected before dispatch
            (Scheduled, Fail) => Error,
            _ => return Err(invalid_transition(Self::ENTITY, self, event)),
        };

        Ok(target)
    }
}

impl LifecycleState for ProcessState {
    type Event = ProcessEvent;

    const ENTITY: &'static str = "process";

    fn determine_target_state(self, event: &ProcessEvent) -> StateMachineResult<ProcessState> {
        use ProcessEvent::*;
        use ProcessState::*;

        let target = match (self, event) {
            (Scheduled, Start) => Running,
            (Running, Complete) => Done,
            (Running, Fail) => Error,
            (Scheduled, Fail) => Error,
            _ => return Err(invalid_transition(Self::ENTITY, self, event)),
        };

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_transitions() {
        assert_eq!(
            StepState::Scheduled
                .determine_target_state(&StepEvent::Start)
                .unwrap(),
            StepState::Running
        );
        assert_eq!(
            StepState::Running
                .determine_target_state(&StepEvent::Fail)
                .unwrap(),
            StepState::Error
        );
        assert!(StepState::Done.determine_target_state(&StepEvent::Fail).is_err());
        assert!(StepState::Scheduled
            .determine_target_state(&StepEvent::Complete)
            .is_err());
    }

    #[test]
    fn test_process_transitions() {
        assert_eq!(
            ProcessState::Running
                .determine_target_state(&ProcessEvent::Complete)
                .unwrap(),
            ProcessState::Done
        );
        assert!(!ProcessState::Error.accepts(&ProcessEvent::Start));
        assert!(ProcessState::Scheduled.accepts(&ProcessEvent::Fail));
    }
}
