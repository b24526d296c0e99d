#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # remote-make
//!
//! Distributed task orchestration: every task gets one ephemeral worker, its
//! steps run in order on the worker's node, and the worker is released when
//! the task ends, whatever the outcome.
//!
//! ## Architecture
//!
//! ```text
//!           master node                                  worker node
//! ┌──────────────────────────────┐              ┌──────────────────────────┐
//! │ TaskOrchestrator             │   request    │ StepDispatcherSubscriber │
//! │   ├─ WorkerLifecycleManager  │ ───────────> │   └─ StepDispatcher      │
//! │   │    ├─ local              │  step.start  │        └─ ProcessRunner  │
//! │   │    └─ docker ────────────┼── runs ────> │                          │
//! │   └─ StepDispatcher (local)  │ <─────────── │                          │
//! └──────────────────────────────┘    reply     └──────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`state_machine`] - Worker, task, step and process lifecycles
//! - [`models`] - Templates and the runtime entities realized from them
//! - [`errors`] - Error taxonomy and phase results carrying partial entities
//! - [`context`] - Cancellation and deadlines for async operations
//! - [`messaging`] - Request/reply message bus (in-memory and TCP)
//! - [`execution`] - Local shell process execution
//! - [`provisioning`] - Worker lifecycle manager and backends
//! - [`orchestration`] - Task orchestrator, step dispatcher, bus subscribers
//! - [`config`] - Layered configuration
//! - [`bootstrap`] - Node wiring from configuration
//! - [`logging`] - Tracing setup and domain logging macros
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use remote_make::context::ExecutionContext;
//! use remote_make::execution::LocalProcessRunner;
//! use remote_make::messaging::{InMemoryMessageBus, MessageBus};
//! use remote_make::models::{TaskTemplate, WorkerTemplate};
//! use remote_make::node::NodeId;
//! use remote_make::orchestration::{BusTaskStarter, StepDispatcher, TaskOrchestrator};
//! use remote_make::provisioning::{LocalBackend, WorkerLifecycleManager};
//!
//! # async fn example() {
//! let node = NodeId::new();
//! let bus: Arc<dyn MessageBus> = Arc::new(InMemoryMessageBus::new());
//! let manager = WorkerLifecycleManager::new()
//!     .with_backend("local", Arc::new(LocalBackend::new(node)));
//! let dispatcher = StepDispatcher::new(
//!     node,
//!     Arc::new(LocalProcessRunner::new()),
//!     Arc::new(BusTaskStarter::new(bus.clone(), node, std::time::Duration::from_secs(60))),
//! );
//! let orchestrator = TaskOrchestrator::new(node, Arc::new(manager), Arc::new(dispatcher), bus);
//!
//! let template = TaskTemplate::new(WorkerTemplate::new("local")).with_command("echo hi");
//! match orchestrator.start(&ExecutionContext::background(), &template).await {
//!     Ok(task) => println!("done with {} steps", task.steps.len()),
//!     Err(failure) => println!("failed: {}", failure.error),
//! }
//! # }
//! ```

pub mod bootstrap;
pub mod config;
pub mod context;
pub mod errors;
pub mod execution;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod node;
pub mod orchestration;
pub mod provisioning;
pub mod state_machine;

pub use bootstrap::{BootstrapError, NodeRuntime};
pub use config::{ConfigLoader, ConfigurationError, RemoteMakeConfig};
pub use context::{ContextError, ExecutionContext};
pub use errors::{
    ErrorKind, ErrorRecord, OrchestratorError, OrchestratorResult, PhaseFailure, PhaseResult,
    Realized,
};
pub use messaging::{InMemoryMessageBus, MessageBus, MessagingError, TcpBroker, TcpMessageBus};
pub use models::{
    Process, ProcessTemplate, Step, StepKind, StepTemplate, Task, TaskTemplate, Worker,
    WorkerTemplate,
};
pub use node::{NodeId, NodeIdentity, NodeStatus};
pub use orchestration::{StepDispatcher, TaskOrchestrator, TaskStarter};
pub use provisioning::{ProvisioningBackend, WorkerLifecycle, WorkerLifecycleManager};
pub use state_machine::{
    ProcessState, StateMachineError, StepState, TaskState, WorkerState,
};
