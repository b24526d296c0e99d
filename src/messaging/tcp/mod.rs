//! Networked message bus: a small broker plus a client implementing [`MessageBus`](crate::messaging::MessageBus)

pub mod broker;
pub mod client;
pub mod frame;

pub use broker::{BrokerHandle, TcpBroker};
pub use client::TcpMessageBus;
pub use frame::{Frame, FrameHeader, MAX_PAYLOAD_BYTES};
