use serde::{Deserialize, Serialize};
use std::fmt;

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Created from a template, nothing allocated yet
    Scheduled,
    /// Backend is allocating the execution environment
    Provisioning,
    /// Execution environment is up and owned by a node
    Provisioned,
    /// Backend is tearing the environment down
    Terminating,
    /// Environment released
    Terminated,
    /// Provisioning or termination failed
    Error,
}

impl WorkerState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated | Self::Error)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// Check if a backend operation is in flight
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Provisioning | Self::Terminating)
    }

    /// Only a provisioned worker holds resources that cleanup must release
    pub fn holds_resources(&self) -> bool {
        matches!(self, Self::Provisioned)
    }
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::Scheduled
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::Provisioned => write!(f, "provisioned"),
            Self::Terminating => write!(f, "terminating"),
            Self::Terminated => write!(f, "terminated"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for WorkerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "provisioning" => Ok(Self::Provisioning),
            "provisioned" => Ok(Self::Provisioned),
            "terminating" => Ok(Self::Terminating),
            "terminated" => Ok(Self::Terminated),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid worker state: {s}")),
        }
    }
}

/// Task lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Initial state when task is created
    Scheduled,
    /// Worker provisioned, steps executing
    Running,
    /// Every step completed successfully
    Done,
    /// A phase failed
    Error,
}

impl TaskState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Scheduled
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid task state: {s}")),
        }
    }
}

/// Step lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Scheduled,
    Running,
    Done,
    Error,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl Default for StepState {
    fn default() -> Self {
        Self::Scheduled
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for StepState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid step state: {s}")),
        }
    }
}

/// Process lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Scheduled,
    Running,
    /// Exited with status zero
    Done,
    /// Non-zero exit, spawn failure, cancellation or timeout
    Error,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl Default for ProcessState {
    fn default() -> Self {
        Self::Scheduled
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for ProcessState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid process state: {s}")),
        }
    }
}
