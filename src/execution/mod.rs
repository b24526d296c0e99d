//! Local command execution

pub mod process_runner;

pub use process_runner::{LocalProcessRunner, ProcessRunner, NO_EXIT_CODE};
