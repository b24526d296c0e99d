//! # In-Memory Message Bus
//!
//! Process-local bus for tests, benchmarks and single-process deployments.
//! Several nodes can share one instance to simulate a cluster.
//!
//! ## Features
//!
//! - **Wildcards**: `*` and `>` subscription patterns
//! - **Exactly-once replies**: reply subjects are registered inboxes removed on first delivery
//! - **No responders**: a request matching no subscription fails immediately

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::bus::{await_reply, BusMessage, MessageBus, MessageHandler, Replier, SubscriptionId};
use super::errors::{MessagingError, MessagingResult};
use super::subjects;
use crate::context::ExecutionContext;

struct Subscription {
    id: SubscriptionId,
    pattern: String,
    handler: MessageHandler,
}

struct BusState {
    subscriptions: RwLock<Vec<Subscription>>,
    inboxes: DashMap<String, oneshot::Sender<Vec<u8>>>,
    next_id: AtomicU64,
}

impl BusState {
    /// Route one message; returns how many receivers got it
    fn deliver(self: &Arc<Self>, subject: &str, reply_to: Option<String>, payload: Vec<u8>) -> usize {
        if let Some((_, waiter)) = self.inboxes.remove(subject) {
            let _ = waiter.send(payload);
            return 1;
        }
        if subjects::is_inbox(subject) {
            debug!(subject = %subject, "Dropping reply with no waiting request");
            return 0;
        }

        let handlers: Vec<MessageHandler> = self
            .subscriptions
            .read()
            .iter()
            .filter(|sub| subjects::matches(&sub.pattern, subject))
            .map(|sub| sub.handler.clone())
            .collect();

        let replier: Option<Arc<dyn Replier>> = reply_to
            .as_ref()
            .map(|_| self.clone() as Arc<dyn Replier>);

        for handler in &handlers {
            let message = BusMessage::new(subject, reply_to.clone(), payload.clone(), replier.clone());
            tokio::spawn(handler(message));
        }

        trace!(subject = %subject, receivers = handlers.len(), "Delivered message");
        handlers.len()
    }
}

#[async_trait]
impl Replier for BusState {
    async fn reply(&self, reply_to: &str, payload: Vec<u8>) -> MessagingResult<()> {
        match self.inboxes.remove(reply_to) {
            Some((_, waiter)) => {
                let _ = waiter.send(payload);
            }
            None => debug!(reply_to = %reply_to, "Dropping late or duplicate reply"),
        }
        Ok(())
    }
}

/// In-memory bus; clones share the same subscriptions
#[derive(Clone)]
pub struct InMemoryMessageBus {
    state: Arc<BusState>,
}

impl std::fmt::Debug for InMemoryMessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMessageBus")
            .field("subscriptions", &self.state.subscriptions.read().len())
            .field("pending_requests", &self.state.inboxes.len())
            .finish()
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(BusState {
                subscriptions: RwLock::new(Vec::new()),
                inboxes: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.state.subscriptions.read().len()
    }

    /// Requests still waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.state.inboxes.len()
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> MessagingResult<()> {
        if !subjects::is_inbox(subject) {
            subjects::validate_subject(subject)?;
        }
        self.state.deliver(subject, None, payload);
        Ok(())
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: MessageHandler,
    ) -> MessagingResult<SubscriptionId> {
        subjects::validate_pattern(pattern)?;
        let id = SubscriptionId(self.state.next_id.fetch_add(1, Ordering::Relaxed));
        self.state.subscriptions.write().push(Subscription {
            id,
            pattern: pattern.to_string(),
            handler,
        });
        debug!(subscription = %id, pattern = %pattern, "Subscribed");
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> MessagingResult<()> {
        self.state.subscriptions.write().retain(|sub| sub.id != id);
        Ok(())
    }

    async fn request(
        &self,
        ctx: &ExecutionContext,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> MessagingResult<Vec<u8>> {
        subjects::validate_subject(subject)?;

        let inbox = subjects::inbox();
        let (tx, rx) = oneshot::channel();
        self.state.inboxes.insert(inbox.clone(), tx);

        if self.state.deliver(subject, Some(inbox.clone()), payload) == 0 {
            self.state.inboxes.remove(&inbox);
            return Err(MessagingError::no_responders(subject));
        }

        let result = await_reply(ctx, subject, timeout, rx).await;
        self.state.inboxes.remove(&inbox);
        result
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::bus::handler;
    use std::sync::atomic::AtomicUsize;

    fn echo_handler() -> MessageHandler {
        handler(|message: BusMessage| async move {
            let _ = message.respond(message.payload.clone()).await;
        })
    }

    #[tokio::test]
    async fn test_request_reply() {
        let bus = InMemoryMessageBus::new();
        bus.subscribe("svc.echo", echo_handler()).await.unwrap();

        let reply = bus
            .request(
                &ExecutionContext::background(),
                "svc.echo",
                b"ping".to_vec(),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(reply, b"ping");
        assert_eq!(bus.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_no_responders_fails_fast() {
        let bus = InMemoryMessageBus::new();
        let err = bus
            .request(
                &ExecutionContext::background(),
                "svc.missing",
                Vec::new(),
                Duration::from_secs(30),
            )
            .await
            .unwrap_err();
        assert!(err.is_no_responders());
        assert_eq!(bus.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_silent_subscriber_times_out() {
        let bus = InMemoryMessageBus::new();
        bus.subscribe("svc.silent", handler(|_message| async {}))
            .await
            .unwrap();

        let err = bus
            .request(
                &ExecutionContext::background(),
                "svc.silent",
                Vec::new(),
                Duration::from_millis(30),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Timeout { .. }));
        assert_eq!(bus.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_first_reply_wins() {
        let bus = InMemoryMessageBus::new();
        for answer in [b"one".to_vec(), b"two".to_vec()] {
            bus.subscribe(
                "svc.race",
                handler(move |message: BusMessage| {
                    let answer = answer.clone();
                    async move {
                        let _ = message.respond(answer).await;
                    }
                }),
            )
            .await
            .unwrap();
        }

        let reply = bus
            .request(
                &ExecutionContext::background(),
                "svc.race",
                Vec::new(),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert!(reply == b"one" || reply == b"two");
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = InMemoryMessageBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = bus
            .subscribe(
                "svc.count",
                handler(move |_message| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .await
            .unwrap();

        bus.publish("svc.count", Vec::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.unsubscribe(id).await.unwrap();
        bus.publish("svc.count", Vec::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_respond_without_reply_subject() {
        let message = BusMessage::new("svc.x", None, Vec::new(), None);
        assert!(message.respond(Vec::new()).await.is_err());
    }
}
