//! # Messaging Error Types

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("No responders for subject: {subject}")]
    NoResponders { subject: String },

    #[error("Request on {subject} timed out after {timeout:?}")]
    Timeout { subject: String, timeout: Duration },

    #[error("Request on {subject} cancelled")]
    Cancelled { subject: String },

    #[error("Connection to {address} failed: {message}")]
    Connection { address: String, message: String },

    #[error("Connection closed: {reason}")]
    ConnectionClosed { reason: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Invalid subject: {subject}: {reason}")]
    InvalidSubject { subject: String, reason: String },

    #[error("Message too large: {size_bytes} bytes exceeds limit of {limit_bytes} bytes")]
    MessageTooLarge {
        size_bytes: usize,
        limit_bytes: usize,
    },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MessagingError {
    pub fn no_responders(subject: impl Into<String>) -> Self {
        Self::NoResponders {
            subject: subject.into(),
        }
    }

    pub fn timeout(subject: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            subject: subject.into(),
            timeout,
        }
    }

    pub fn cancelled(subject: impl Into<String>) -> Self {
        Self::Cancelled {
            subject: subject.into(),
        }
    }

    pub fn connection(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            address: address.into(),
            message: message.into(),
        }
    }

    pub fn connection_closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn invalid_subject(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSubject {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    /// Check if this error means nobody was listening
    pub fn is_no_responders(&self) -> bool {
        matches!(self, Self::NoResponders { .. })
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;
