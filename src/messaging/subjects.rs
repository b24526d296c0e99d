//! # Subjects
//!
//! Dot-separated, node-addressed subject names and wildcard matching.
//!
//! | Subject | Request | Reply |
//! |---------|---------|-------|
//! | `node.<id>.task.start` | `TaskTemplate` | `Task` |
//! | `node.<id>.step.start` | `StepTemplate` | `Step` |
//! | `node.<id>.node.provision` | `WorkerTemplate` | `Worker` |
//! | `node.<id>.node.terminate` | `Worker` | `Worker` |
//! | `node.<id>.ping` | empty | `NodeStatus` |
//!
//! Patterns use `*` for exactly one token and `>` for one or more trailing tokens.

use uuid::Uuid;

use super::errors::{MessagingError, MessagingResult};
use crate::node::NodeId;

/// Prefix of reply subjects
pub const INBOX_PREFIX: &str = "_INBOX";

pub fn task_start(node: NodeId) -> String {
    format!("node.{node}.task.start")
}

pub fn step_start(node: NodeId) -> String {
    format!("node.{node}.step.start")
}

pub fn node_provision(node: NodeId) -> String {
    format!("node.{node}.node.provision")
}

pub fn node_terminate(node: NodeId) -> String {
    format!("node.{node}.node.terminate")
}

pub fn node_ping(node: NodeId) -> String {
    format!("node.{node}.ping")
}

/// Fresh reply subject
pub fn inbox() -> String {
    format!("{INBOX_PREFIX}.{}", Uuid::new_v4())
}

/// Fresh reply subject under a connection-scoped prefix
pub fn scoped_inbox(scope: &str) -> String {
    format!("{INBOX_PREFIX}.{scope}.{}", Uuid::new_v4())
}

pub fn is_inbox(subject: &str) -> bool {
    subject
        .strip_prefix(INBOX_PREFIX)
        .map(|rest| rest.starts_with('.'))
        .unwrap_or(false)
}

/// Reject subjects that cannot be published to
pub fn validate_subject(subject: &str) -> MessagingResult<()> {
    if subject.is_empty() {
        return Err(MessagingError::invalid_subject(subject, "empty subject"));
    }
    if subject.chars().any(char::is_whitespace) {
        return Err(MessagingError::invalid_subject(subject, "contains whitespace"));
    }
    for token in subject.split('.') {
        if token.is_empty() {
            return Err(MessagingError::invalid_subject(subject, "empty token"));
        }
        if token == "*" || token == ">" {
            return Err(MessagingError::invalid_subject(
                subject,
                "wildcards are only valid in subscriptions",
            ));
        }
    }
    Ok(())
}

/// Reject malformed subscription patterns
pub fn validate_pattern(pattern: &str) -> MessagingResult<()> {
    if pattern.is_empty() {
        return Err(MessagingError::invalid_subject(pattern, "empty pattern"));
    }
    let tokens: Vec<&str> = pattern.split('.').collect();
    for (index, token) in tokens.iter().enumerate() {
        if token.is_empty() {
            return Err(MessagingError::invalid_subject(pattern, "empty token"));
        }
        if *token == ">" && index != tokens.len() - 1 {
            return Err(MessagingError::invalid_subject(
                pattern,
                "'>' must be the last token",
            ));
        }
    }
    Ok(())
}

/// Check if `subject` matches `pattern`
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(expected), Some(actual)) if expected == actual => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
