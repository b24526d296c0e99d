use std::fmt;
use uuid::Uuid;

use super::errors::StateMachineResult;

/// A lifecycle state with a pure transition table
pub trait LifecycleState: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    type Event: fmt::Debug + Copy;

    /// Entity name used in errors and logs
    const ENTITY: &'static str;

    /// Determine the target state for `event`, or reject it
    fn determine_target_state(self, event: &Self::Event) -> StateMachineResult<Self>;

    /// Check if `event` is permitted from this state
    fn accepts(self, event: &Self::Event) -> bool {
        self.determine_target_state(event).is_ok()
    }
}

/// Applies transitions to entity state
///
/// A rejected transition is a programming error: debug builds panic, release
/// builds log it and hand the error back without touching the state.
#[derive(Debug)]
pub struct TransitionGuard;

impl TransitionGuard {
    pub fn apply<S: LifecycleState>(
        entity_id: Uuid,
        state: &mut S,
        event: S::Event,
    ) -> StateMachineResult<S> {
        match state.determine_target_state(&event) {
            Ok(target) => {
                tracing::debug!(
                    entity = S::ENTITY,
                    entity_id = %entity_id,
                    from = %state,
                    to = %target,
                    event = ?event,
                    "State transition"
                );
                *state = target;
                Ok(target)
            }
            Err(err) => {
                tracing::error!(
                    entity = S::ENTITY,
                    entity_id = %entity_id,
                    from = %state,
                    event = ?event,
                    error = %err,
                    "Lifecycle violation"
                );
                if cfg!(debug_assertions) {
                    panic!("lifecycle violation on {} {entity_id}: {err}", S::ENTITY);
                }
                Err(err)
            }
        }
    }
}
