//! # Error Types
//!
//! Error taxonomy for task orchestration.
//!
//! Every [`OrchestratorError`] classifies into an [`ErrorKind`]. The kind travels
//! across the message bus inside an [`ErrorRecord`], so a failure that happened on
//! a remote node is still classified correctly when the realized entity comes back.
//!
//! Phase operations (provision, step dispatch, cleanup) never return a bare error:
//! they return [`PhaseResult`], whose failure side carries the partially realized
//! entity next to the error so callers can see exactly where things stopped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::context::ContextError;
use crate::messaging::MessagingError;
use crate::state_machine::StateMachineError;

/// Classification of an orchestration failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown backend name, malformed template. Never retried automatically.
    Configuration,
    /// Bus unreachable, nobody answering, undecodable reply
    Transport,
    /// A bounded operation ran out of time
    Timeout,
    /// The caller cancelled the operation
    Cancelled,
    /// Non-zero process exit, remote step reported failure, backend failure
    Execution,
    /// A state transition was attempted from a state that does not permit it
    LifecycleViolation,
    /// Worker termination failed after the task ran
    Cleanup,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Transport => write!(f, "transport"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Execution => write!(f, "execution"),
            Self::LifecycleViolation => write!(f, "lifecycle_violation"),
            Self::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// Serializable error snapshot attached to runtime entities as `last_error`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Orchestration error taxonomy
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    #[error("Unknown backend: {backend}")]
    UnknownBackend { backend: String },

    #[error("Invalid template {template_id}: {reason}")]
    InvalidTemplate { template_id: Uuid, reason: String },

    #[error("Unsupported step {step_id}: {reason}")]
    UnsupportedStep { step_id: Uuid, reason: String },

    #[error("Transport error on {subject}: {reason}")]
    Transport { subject: String, reason: String },

    #[error("Timeout error for operation {operation}: {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Option<Duration>,
    },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Process {process_id} failed with exit code {exit_code}: {reason}")]
    ProcessFailed {
        process_id: Uuid,
        exit_code: i32,
        reason: String,
    },

    #[error("Backend {backend} failed to {operation} worker {worker_id}: {reason}")]
    BackendFailed {
        backend: String,
        worker_id: Uuid,
        operation: String,
        reason: String,
    },

    #[error("Step {step_id} failed: {record}")]
    StepFailed { step_id: Uuid, record: ErrorRecord },

    #[error("Nested task {task_id} failed: {record}")]
    NestedTaskFailed { task_id: Uuid, record: ErrorRecord },

    #[error("Lifecycle violation: {0}")]
    LifecycleViolation(String),

    #[error("Cleanup failed for worker {worker_id}: {reason}")]
    CleanupFailed { worker_id: Uuid, reason: String },

    #[error("Remote error {0}")]
    Remote(ErrorRecord),
}

impl OrchestratorError {
    pub fn unknown_backend(backend: impl Into<String>) -> Self {
        Self::UnknownBackend {
            backend: backend.into(),
        }
    }

    pub fn invalid_template(template_id: Uuid, reason: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            template_id,
            reason: reason.into(),
        }
    }

    pub fn unsupported_step(step_id: Uuid, reason: impl Into<String>) -> Self {
        Self::UnsupportedStep {
            step_id,
            reason: reason.into(),
        }
    }

    pub fn transport(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn backend_failed(
        backend: impl Into<String>,
        worker_id: Uuid,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::BackendFailed {
            backend: backend.into(),
            worker_id,
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn cleanup_failed(worker_id: Uuid, reason: impl Into<String>) -> Self {
        Self::CleanupFailed {
            worker_id,
            reason: reason.into(),
        }
    }

    /// Map an interrupted [`ExecutionContext`](crate::context::ExecutionContext)
    /// wait onto the matching error kind
    pub fn interrupted(
        error: ContextError,
        operation: impl Into<String>,
        budget: Option<Duration>,
    ) -> Self {
        match error {
            ContextError::Cancelled => Self::cancelled(operation),
            ContextError::DeadlineExceeded => Self::timeout(operation, budget),
        }
    }

    /// Map a bus failure for `subject` onto the taxonomy
    pub fn from_messaging(subject: &str, error: MessagingError) -> Self {
        match error {
            MessagingError::Timeout { timeout, .. } => Self::timeout(subject, Some(timeout)),
            MessagingError::Cancelled { .. } => Self::cancelled(subject),
            other => Self::transport(subject, other.to_string()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownBackend { .. }
            | Self::InvalidTemplate { .. }
            | Self::UnsupportedStep { .. } => ErrorKind::Configuration,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::ProcessFailed { .. }
            | Self::BackendFailed { .. }
            | Self::StepFailed { .. }
            | Self::NestedTaskFailed { .. } => ErrorKind::Execution,
            Self::LifecycleViolation(_) => ErrorKind::LifecycleViolation,
            Self::CleanupFailed { .. } => ErrorKind::Cleanup,
            Self::Remote(record) => record.kind,
        }
    }

    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord::new(self.kind(), self.to_string())
    }
}

impl From<StateMachineError> for OrchestratorError {
    fn from(err: StateMachineError) -> Self {
        OrchestratorError::LifecycleViolation(err.to_string())
    }
}

impl From<ErrorRecord> for OrchestratorError {
    fn from(record: ErrorRecord) -> Self {
        OrchestratorError::Remote(record)
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// A failed phase: the error plus the entity as far as it got
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseFailure<T> {
    pub entity: T,
    pub error: OrchestratorError,
}

impl<T> PhaseFailure<T> {
    pub fn new(entity: T, error: OrchestratorError) -> Self {
        Self { entity, error }
    }

    pub fn into_parts(self) -> (T, OrchestratorError) {
        (self.entity, self.error)
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl<T> fmt::Display for PhaseFailure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl<T: fmt::Debug> std::error::Error for PhaseFailure<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Result of a phase operation. Both sides carry the realized entity.
pub type PhaseResult<T> = Result<T, PhaseFailure<T>>;

/// Access to the realized entity regardless of outcome
pub trait Realized<T> {
    fn realized(&self) -> &T;
    fn into_realized(self) -> T;
    fn phase_error(&self) -> Option<&OrchestratorError>;
}

impl<T> Realized<T> for PhaseResult<T> {
    fn realized(&self) -> &T {
        match self {
            Ok(entity) => entity,
            Err(failure) => &failure.entity,
        }
    }

    fn into_realized(self) -> T {
        match self {
            Ok(entity) => entity,
            Err(failure) => failure.entity,
        }
    }

    fn phase_error(&self) -> Option<&OrchestratorError> {
        self.as_ref().err().map(|failure| &failure.error)
    }
}
