//! # TCP Broker
//!
//! Routes frames between connected [`TcpMessageBus`](super::TcpMessageBus)
//! clients. Each connection gets a reader loop and a writer task joined by an
//! unbounded channel, so a slow client never stalls routing for the others.
//!
//! A `pub` carrying a reply subject that matches no subscription is answered
//! with a `no_responders` frame to the publisher.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::frame::{read_frame, write_frame, Frame, FrameHeader};
use crate::messaging::errors::{MessagingError, MessagingResult};
use crate::messaging::subjects;

struct ClientConnection {
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<Frame>,
    subscriptions: Mutex<Vec<(u64, String)>>,
}

#[derive(Default)]
struct BrokerState {
    connections: DashMap<u64, Arc<ClientConnection>>,
    next_connection: AtomicU64,
}

impl BrokerState {
    /// Fan a publish out to matching subscriptions; returns the delivery count
    fn route(&self, subject: &str, reply_to: &Option<String>, payload: &[u8]) -> usize {
        let mut delivered = 0;
        for entry in self.connections.iter() {
            let connection = entry.value();
            let sids: Vec<u64> = connection
                .subscriptions
                .lock()
                .iter()
                .filter(|(_, pattern)| subjects::matches(pattern, subject))
                .map(|(sid, _)| *sid)
                .collect();
            for sid in sids {
                let frame = Frame::deliver(sid, subject, reply_to.clone(), payload.to_vec());
                if connection.outbound.send(frame).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

pub struct TcpBroker {
    listener: TcpListener,
    state: Arc<BrokerState>,
}

/// Running broker; dropping it does not stop the accept loop, call `shutdown`
pub struct BrokerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for BrokerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerHandle")
            .field("local_addr", &self.local_addr)
            .field("running", &!self.task.is_finished())
            .finish()
    }
}

impl BrokerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}

impl TcpBroker {
    pub async fn bind(address: &str) -> MessagingResult<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| MessagingError::connection(address, e.to_string()))?;
        Ok(Self {
            listener,
            state: Arc::new(BrokerState::default()),
        })
    }

    pub fn local_addr(&self) -> MessagingResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Start accepting connections in the background
    pub fn spawn(self) -> MessagingResult<BrokerHandle> {
        let local_addr = self.local_addr()?;
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let task = tokio::spawn(async move { self.accept_connections(token).await });
        info!(address = %local_addr, "TCP broker listening");
        Ok(BrokerHandle {
            local_addr,
            shutdown,
            task,
        })
    }

    async fn accept_connections(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let state = self.state.clone();
                        let token = shutdown.child_token();
                        tokio::spawn(async move {
                            handle_connection(state, stream, peer, token).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept broker connection"),
                },
                _ = shutdown.cancelled() => {
                    info!("TCP broker shutting down");
                    break;
                }
            }
        }
    }
}

async fn handle_connection(
    state: Arc<BrokerState>,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: CancellationToken,
) {
    let connection_id = state.next_connection.fetch_add(1, Ordering::Relaxed);
    let (read_half, mut write_half) = stream.into_split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();

    let connection = Arc::new(ClientConnection {
        peer,
        outbound,
        subscriptions: Mutex::new(Vec::new()),
    });
    state.connections.insert(connection_id, connection.clone());
    debug!(connection_id, peer = %peer, "Broker connection opened");

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = write_frame(&mut write_half, &frame).await {
                debug!(error = %e, "Broker write failed");
                break;
            }
        }
    });

    let mut reader = BufReader::new(read_half);
    loop {
        let frame = tokio::select! {
            frame = read_frame(&mut reader) => frame,
            _ = shutdown.cancelled() => break,
        };

        match frame {
            Ok(Some(frame)) => handle_frame(&state, &connection, frame),
            Ok(None) => break,
            Err(e) => {
                warn!(connection_id, peer = %connection.peer, error = %e, "Dropping broker connection");
                break;
            }
        }
    }

    state.connections.remove(&connection_id);
    writer.abort();
    debug!(connection_id, peer = %peer, "Broker connection closed");
}

fn handle_frame(state: &BrokerState, connection: &ClientConnection, frame: Frame) {
    match frame.header {
        FrameHeader::Sub { sid, pattern } => {
            if let Err(e) = subjects::validate_pattern(&pattern) {
                warn!(sid, error = %e, "Rejected subscription");
                return;
            }
            connection.subscriptions.lock().push((sid, pattern));
        }
        FrameHeader::Unsub { sid } => {
            connection.subscriptions.lock().retain(|(id, _)| *id != sid);
        }
        FrameHeader::Pub {
            subject, reply_to, ..
        } => {
            let delivered = state.route(&subject, &reply_to, &frame.payload);
            if delivered == 0 {
                match reply_to {
                    Some(reply_to) if !subjects::is_inbox(&subject) => {
                        let _ = connection.outbound.send(Frame::control(
                            FrameHeader::NoResponders { subject, reply_to },
                        ));
                    }
                    _ => debug!(subject = %subject, "Publish reached no subscribers"),
                }
            }
        }
        FrameHeader::Msg { .. } | FrameHeader::NoResponders { .. } => {
            warn!(peer = %connection.peer, "Client sent a broker-only frame");
        }
    }
}
