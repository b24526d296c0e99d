//! # Models
//!
//! Templates describe work; runtime entities record what happened.
//!
//! | Template | Runtime entity |
//! |----------|----------------|
//! | [`WorkerTemplate`] | [`Worker`] |
//! | [`TaskTemplate`] | [`Task`] |
//! | [`StepTemplate`] | [`Step`] |
//! | [`ProcessTemplate`] | [`Process`] |
//!
//! Every type here is serde-serializable; the JSON encoding is the bus wire format.

pub mod process;
pub mod step;
pub mod task;
pub mod templates;
pub mod worker;

pub use process::Process;
pub use step::Step;
pub use task::Task;
pub use templates::{
    ProcessTemplate, StepKind, StepPayload, StepTemplate, TaskTemplate, WorkerTemplate,
};
pub use worker::Worker;
