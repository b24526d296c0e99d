//! # Message Bus Trait
//!
//! Provider-agnostic publish/subscribe with request/reply.
//!
//! ## Delivery semantics
//!
//! - `publish` is fire-and-forget; a publish nobody hears is silently dropped.
//! - `request` publishes with a fresh reply subject and waits for exactly one
//!   reply. The first reply wins; later replies on the same subject are dropped.
//! - A request that reaches no subscriber fails with
//!   [`MessagingError::NoResponders`] instead of waiting for its timeout.
//! - Handlers run as independent tokio tasks, so a slow handler never blocks
//!   delivery to others.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::errors::{MessagingError, MessagingResult};
use crate::context::ExecutionContext;

/// Identifies a subscription for `unsubscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Sends a reply on behalf of a delivered message
#[async_trait]
pub trait Replier: Send + Sync {
    async fn reply(&self, reply_to: &str, payload: Vec<u8>) -> MessagingResult<()>;
}

/// A message delivered to a subscription handler
#[derive(Clone)]
pub struct BusMessage {
    pub subject: String,
    pub reply_to: Option<String>,
    pub payload: Vec<u8>,
    replier: Option<Arc<dyn Replier>>,
}

impl fmt::Debug for BusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusMessage")
            .field("subject", &self.subject)
            .field("reply_to", &self.reply_to)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl BusMessage {
    pub fn new(
        subject: impl Into<String>,
        reply_to: Option<String>,
        payload: Vec<u8>,
        replier: Option<Arc<dyn Replier>>,
    ) -> Self {
        Self {
            subject: subject.into(),
            reply_to,
            payload,
            replier,
        }
    }

    /// Answer a request. Fails if the message carried no reply subject.
    pub async fn respond(&self, payload: Vec<u8>) -> MessagingResult<()> {
        match (&self.reply_to, &self.replier) {
            (Some(reply_to), Some(replier)) => replier.reply(reply_to, payload).await,
            _ => Err(MessagingError::protocol(format!(
                "message on {} has no reply subject",
                self.subject
            ))),
        }
    }
}

/// Subscription callback
pub type MessageHandler = Arc<dyn Fn(BusMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`]
pub fn handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(BusMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Fire-and-forget publish
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> MessagingResult<()>;

    /// Register `handler` for every subject matching `pattern`
    async fn subscribe(
        &self,
        pattern: &str,
        handler: MessageHandler,
    ) -> MessagingResult<SubscriptionId>;

    /// Remove a subscription; unknown ids are ignored
    async fn unsubscribe(&self, id: SubscriptionId) -> MessagingResult<()>;

    /// Publish and wait for the first reply
    ///
    /// Bounded by both `timeout` and `ctx`; whichever ends first decides the
    /// error (`Timeout` or `Cancelled`).
    async fn request(
        &self,
        ctx: &ExecutionContext,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> MessagingResult<Vec<u8>>;

    /// Provider name for logs
    fn provider_name(&self) -> &'static str;
}

/// Wait on a reply channel under a request budget
pub(crate) async fn await_reply<T>(
    ctx: &ExecutionContext,
    subject: &str,
    timeout: Duration,
    reply: tokio::sync::oneshot::Receiver<T>,
) -> MessagingResult<T> {
    use crate::context::ContextError;

    let bounded = ctx.child_with_timeout(timeout);
    match bounded.run(reply).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) => Err(MessagingError::connection_closed(format!(
            "reply channel for {subject} dropped"
        ))),
        Err(ContextError::Cancelled) => Err(MessagingError::cancelled(subject)),
        Err(ContextError::DeadlineExceeded) => Err(MessagingError::timeout(subject, timeout)),
    }
}
