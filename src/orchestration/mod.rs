//! # Orchestration
//!
//! Task and step execution.
//!
//! ## Architecture
//!
//! ```text
//!                   ┌──────────────── TaskOrchestrator ────────────────┐
//!                   │  provision ─> steps (ordered) ─> cleanup          │
//!                   └──────┬──────────────┬──────────────────┬──────────┘
//!                          │              │                  │
//!                 WorkerLifecycle   local StepDispatcher   bus request
//!                                         │              node.<id>.step.start
//!                          ┌──────────────┴───────┐              │
//!                    ProcessRunner        TaskStarter     StepDispatcherSubscriber
//!                                     (nested tasks)        (on the worker's node)
//! ```
//!
//! The orchestrator hands itself to its local dispatcher as the
//! [`TaskStarter`], so nested tasks recurse in-process without the dispatcher
//! holding a reference back to the orchestrator.

pub mod step_dispatcher;
pub mod subscribers;
pub mod task_orchestrator;
pub mod task_starter;

pub use step_dispatcher::StepDispatcher;
pub use subscribers::{
    NodeStatusSubscriber, StepDispatcherSubscriber, TaskOrchestratorSubscriber,
    WorkerLifecycleSubscriber,
};
pub use task_orchestrator::{OrchestratorTimeouts, TaskOrchestrator};
pub use task_starter::{BusTaskStarter, TaskStarter};
