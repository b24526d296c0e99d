//! # Lifecycle State Machines
//!
//! Worker, Task, Step and Process each follow a small finite state machine.
//! Transition tables are pure functions on the state enums
//! ([`LifecycleState::determine_target_state`]); [`TransitionGuard::apply`]
//! mutates entity state and enforces the violation policy.
//!
//! ```text
//! Worker:  scheduled -> provisioning -> provisioned -> terminating -> terminated
//!              \             \              \              \
//!               +-------------+--------------+--------------+--> error
//!
//! Task/Step/Process:  scheduled -> running -> done
//!                          \          \
//!                           +----------+--> error
//! ```

pub mod errors;
pub mod events;
pub mod guards;
pub mod states;
pub mod step_state_machine;
pub mod task_state_machine;
pub mod worker_state_machine;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::{ProcessEvent, StepEvent, TaskEvent, WorkerEvent};
pub use guards::{LifecycleState, TransitionGuard};
pub use states::{ProcessState, StepState, TaskState, WorkerState};
