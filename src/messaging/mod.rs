//! # Messaging
//!
//! Request/reply message bus that connects nodes.
//!
//! ## Architecture
//!
//! ```text
//! TaskOrchestrator ──request──> node.<id>.step.start ──> StepDispatcherSubscriber
//!        ^                                                        │
//!        └──────────────────── reply (_INBOX.*) <─────────────────┘
//! ```
//!
//! - [`MessageBus`]: provider-agnostic trait
//! - [`InMemoryMessageBus`]: process-local provider
//! - [`TcpMessageBus`] + [`TcpBroker`]: networked provider
//! - [`subjects`]: subject naming and wildcard matching
//! - [`codec`]: JSON payload encoding

pub mod bus;
pub mod codec;
pub mod errors;
pub mod in_memory;
pub mod subjects;
pub mod tcp;

pub use bus::{handler, BusMessage, MessageBus, MessageHandler, Replier, SubscriptionId};
pub use errors::{MessagingError, MessagingResult};
pub use in_memory::InMemoryMessageBus;
pub use tcp::{BrokerHandle, TcpBroker, TcpMessageBus};
