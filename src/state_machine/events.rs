//! # State Machine Events
//!
//! Events that trigger state transitions in workers, tasks, steps and processes.
//!
//! | Entity | Events |
//! |--------|--------|
//! | Worker | `Provision`, `Provisioned`, `Terminate`, `Terminated`, `Fail` |
//! | Task | `Start`, `Complete`, `Fail`, `CleanupFailed` |
//! | Step | `Start`, `Complete`, `Fail` |
//! | Process | `Start`, `Complete`, `Fail` |
//!
//! `event_type()` gives the string name used in logs.

use serde::{Deserialize, Serialize};

/// Events that can trigger worker state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WorkerEvent {
    /// Backend begins allocating
    Provision,
    /// Backend finished allocating
    Provisioned,
    /// Backend begins releasing
    Terminate,
    /// Backend finished releasing
    Terminated,
    /// Provisioning or termination failed
    Fail,
}

impl WorkerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::Provisioned => "provisioned",
            Self::Terminate => "terminate",
            Self::Terminated => "terminated",
            Self::Fail => "error",
        }
    }
}

/// Events that can trigger task state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TaskEvent {
    /// Worker provisioned, begin running steps
    Start,
    /// All steps done
    Complete,
    /// A phase failed
    Fail,
    /// Worker termination failed after the task finished
    CleanupFailed,
}

impl TaskEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail => "error",
            Self::CleanupFailed => "cleanup_failed",
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Start)
    }
}

/// Events that can trigger step state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StepEvent {
    Start,
    Complete,
    Fail,
}

impl StepEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail => "error",
        }
    }
}

/// Events that can trigger process state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ProcessEvent {
    Start,
    Complete,
    Fail,
}

impl ProcessEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail => "error",
        }
    }
}
