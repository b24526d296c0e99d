use super::errors::{invalid_transition, StateMachineResult};
use super::events::WorkerEvent;
use super::guards::LifecycleState;
use super::states::WorkerState;

impl LifecycleState for WorkerState {
    type Event = WorkerEvent;

    const ENTITY: &'static str = "worker";

    fn determine_target_state(self, event: &WorkerEvent) -> StateMachineResult<WorkerState> {
        use WorkerState::*;

        let target = match (self, event) {
            (Scheduled, WorkerEvent::Provision) => Provisioning,
            (Provisioning, WorkerEvent::Provisioned) => Provisioned,
            (Provisioned, WorkerEvent::Terminate) => Terminating,
            (Terminating, WorkerEvent::Terminated) => Terminated,

            // Unknown backend is rejected before provisioning starts
            (Scheduled, WorkerEvent::Fail) => Error,
            (Provisioning, WorkerEvent::Fail) => Error,
            // Unknown backend on terminate
            (Provisioned, WorkerEvent::Fail) => Error,
            (Terminating, WorkerEvent::Fail) => Error,

            _ => return Err(invalid_transition(Self::ENTITY, self, event)),
        };

        Ok(target)
    }
}
