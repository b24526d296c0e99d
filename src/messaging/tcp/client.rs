//! # TCP Message Bus Client
//!
//! [`MessageBus`] over one TCP connection to a [`TcpBroker`](super::TcpBroker).
//!
//! Subscription id 0 is reserved for this connection's reply inbox,
//! `_INBOX.<client-id>.>`; every request gets a fresh subject under it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::frame::{read_frame, write_frame, Frame, FrameHeader, MAX_PAYLOAD_BYTES};
use crate::context::ExecutionContext;
use crate::messaging::bus::{
    await_reply, BusMessage, MessageBus, MessageHandler, Replier, SubscriptionId,
};
use crate::messaging::errors::{MessagingError, MessagingResult};
use crate::messaging::subjects;

const INBOX_SID: u64 = 0;

enum InboxReply {
    Payload(Vec<u8>),
    NoResponders,
}

struct ClientState {
    address: String,
    client_id: Uuid,
    outbound: mpsc::UnboundedSender<Frame>,
    handlers: DashMap<u64, MessageHandler>,
    inboxes: DashMap<String, oneshot::Sender<InboxReply>>,
    next_sid: AtomicU64,
    closed: CancellationToken,
}

impl ClientState {
    /// Queue a frame for the writer task. Oversized payloads are refused here so
    /// the writer never sees a frame it cannot put on the wire.
    fn send(&self, frame: Frame) -> MessagingResult<()> {
        if frame.payload.len() > MAX_PAYLOAD_BYTES {
            return Err(MessagingError::MessageTooLarge {
                size_bytes: frame.payload.len(),
                limit_bytes: MAX_PAYLOAD_BYTES,
            });
        }
        if self.closed.is_cancelled() {
            return Err(MessagingError::connection_closed(format!(
                "connection to {} closed",
                self.address
            )));
        }
        self.outbound
            .send(frame)
            .map_err(|_| MessagingError::connection_closed("writer task stopped"))
    }

    fn inbox_prefix(&self) -> String {
        format!("{}.{}", subjects::INBOX_PREFIX, self.client_id)
    }
}

impl Drop for ClientState {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

#[async_trait]
impl Replier for ClientState {
    async fn reply(&self, reply_to: &str, payload: Vec<u8>) -> MessagingResult<()> {
        self.send(Frame::publish(reply_to, None, payload))
    }
}

/// Networked bus client; clones share one connection
#[derive(Clone)]
pub struct TcpMessageBus {
    state: Arc<ClientState>,
}

impl std::fmt::Debug for TcpMessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpMessageBus")
            .field("address", &self.state.address)
            .field("client_id", &self.state.client_id)
            .field("connected", &!self.state.closed.is_cancelled())
            .finish()
    }
}

impl TcpMessageBus {
    pub async fn connect(address: &str) -> MessagingResult<Self> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| MessagingError::connection(address, e.to_string()))?;
        stream.set_nodelay(true)?;
        let (read_half, mut write_half) = stream.into_split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let closed = CancellationToken::new();

        let state = Arc::new(ClientState {
            address: address.to_string(),
            client_id: Uuid::new_v4(),
            outbound,
            handlers: DashMap::new(),
            inboxes: DashMap::new(),
            next_sid: AtomicU64::new(INBOX_SID + 1),
            closed: closed.clone(),
        });

        let writer_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = outbound_rx.recv() => match frame {
                        Some(frame) => {
                            if let Err(e) = write_frame(&mut write_half, &frame).await {
                                warn!(error = %e, "Bus write failed");
                                writer_closed.cancel();
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = writer_closed.cancelled() => break,
                }
            }
        });

        tokio::spawn(read_loop(Arc::downgrade(&state), read_half, closed));

        state.send(Frame::control(FrameHeader::Sub {
            sid: INBOX_SID,
            pattern: format!("{}.>", state.inbox_prefix()),
        }))?;

        info!(address = %address, client_id = %state.client_id, "Connected to TCP bus");
        Ok(Self { state })
    }

    /// Drop the connection; pending requests fail with `ConnectionClosed`
    pub fn close(&self) {
        self.state.closed.cancel();
        self.state.inboxes.clear();
    }

    pub fn is_connected(&self) -> bool {
        !self.state.closed.is_cancelled()
    }
}

async fn read_loop(
    state: std::sync::Weak<ClientState>,
    read_half: OwnedReadHalf,
    closed: CancellationToken,
) {
    let mut reader = BufReader::new(read_half);
    loop {
        let frame = tokio::select! {
            frame = read_frame(&mut reader) => frame,
            _ = closed.cancelled() => break,
        };
        let Some(state) = state.upgrade() else {
            break;
        };

        match frame {
            Ok(Some(Frame {
                header: FrameHeader::Msg {
                    sid,
                    subject,
                    reply_to,
                    ..
                },
                payload,
            })) => {
                if sid == INBOX_SID {
                    if let Some((_, waiter)) = state.inboxes.remove(&subject) {
                        let _ = waiter.send(InboxReply::Payload(payload));
                    } else {
                        debug!(subject = %subject, "Dropping late or duplicate reply");
                    }
                    continue;
                }
                let handler = state.handlers.get(&sid).map(|entry| entry.value().clone());
                if let Some(handler) = handler {
                    let replier: Option<Arc<dyn Replier>> = reply_to
                        .as_ref()
                        .map(|_| state.clone() as Arc<dyn Replier>);
                    tokio::spawn(handler(BusMessage::new(subject, reply_to, payload, replier)));
                }
            }
            Ok(Some(Frame {
                header: FrameHeader::NoResponders { reply_to, .. },
                ..
            })) => {
                if let Some((_, waiter)) = state.inboxes.remove(&reply_to) {
                    let _ = waiter.send(InboxReply::NoResponders);
                }
            }
            Ok(Some(frame)) => {
                warn!(header = ?frame.header, "Unexpected frame from broker");
            }
            Ok(None) => {
                info!(address = %state.address, "Bus connection closed by broker");
                break;
            }
            Err(e) => {
                warn!(address = %state.address, error = %e, "Bus read failed");
                break;
            }
        }
    }

    closed.cancel();
    if let Some(state) = state.upgrade() {
        state.inboxes.clear();
    }
}

#[async_trait]
impl MessageBus for TcpMessageBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> MessagingResult<()> {
        subjects::validate_subject(subject)?;
        self.state.send(Frame::publish(subject, None, payload))
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: MessageHandler,
    ) -> MessagingResult<SubscriptionId> {
        subjects::validate_pattern(pattern)?;
        let sid = self.state.next_sid.fetch_add(1, Ordering::Relaxed);
        self.state.handlers.insert(sid, handler);
        self.state.send(Frame::control(FrameHeader::Sub {
            sid,
            pattern: pattern.to_string(),
        }))?;
        Ok(SubscriptionId(sid))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> MessagingResult<()> {
        if self.state.handlers.remove(&id.0).is_some() {
            self.state
                .send(Frame::control(FrameHeader::Unsub { sid: id.0 }))?;
        }
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

        let inbox = subjects::scoped_inbox(&self.state.client_id.to_string());
        let (tx, rx) = oneshot::channel();
        self.state.inboxes.insert(inbox.clone(), tx);

        if let Err(e) = self
            .state
            .send(Frame::publish(subject, Some(inbox.clone()), payload))
        {
            self.state.inboxes.remove(&inbox);
            return Err(e);
        }

        let result = await_reply(ctx, subject, timeout, rx).await;
        self.state.inboxes.remove(&inbox);
        match result? {
            InboxReply::Payload(payload) => Ok(payload),
            InboxReply::NoResponders => Err(MessagingError::no_responders(subject)),
        }
    }

    fn provider_name(&self) -> &'static str {
        "tcp"
    }
}
