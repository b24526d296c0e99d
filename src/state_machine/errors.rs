use thiserror::Error;

/// Errors raised by lifecycle state machines
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid {entity} state transition from {from:?} on {to}")]
    InvalidTransition {
        entity: &'static str,
        from: Option<String>,
        to: String,
    },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;

/// Helper function to create an invalid transition error
pub fn invalid_transition(
    entity: &'static str,
    from: impl ToString,
    event: &impl std::fmt::Debug,
) -> StateMachineError {
    StateMachineError::InvalidTransition {
        entity,
        from: Some(from.to_string()),
        to: format!("{event:?}"),
    }
}
