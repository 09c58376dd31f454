//! Subscriber connections.
//!
//! A connection is split in two halves at creation:
//!
//! - [`Connection`] is handed to the hub and lives in its registry. It holds
//!   the sending side of the bounded outbox and the close signal.
//! - [`Outbox`] stays with the transport layer, which drains it into the
//!   client's transport on its own task.
//!
//! Removing a connection from the hub consumes the [`Connection`], so the
//! outbox is closed exactly once and can never be written afterwards.

use crate::hub::HubError;
use crate::message::Message;
use crate::route::Route;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// Upper bound on how long the drain task waits for a transport to close.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw numeric ID.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a connection stopped receiving updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Removed by an explicit unsubscribe.
    Unsubscribed,
    /// Removed by the hub because its outbox was full.
    Evicted,
    /// The transport rejected a write.
    TransportFailed,
    /// The hub went away without removing the connection.
    HubStopped,
}

impl CloseReason {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Unsubscribed => "unsubscribed",
            CloseReason::Evicted => "evicted",
            CloseReason::TransportFailed => "transport_failed",
            CloseReason::HubStopped => "hub_stopped",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The write side of a subscriber's client channel.
///
/// Implementations own the underlying endpoint (a websocket sink, a test
/// recorder, ...). The drain task is the only caller, so `close` is invoked
/// at most once per transport.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Error type reported by the endpoint.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Push one message to the client.
    async fn send(&mut self, message: &Message) -> Result<(), Self::Error>;

    /// Close the endpoint, telling the client why when the protocol allows.
    async fn close(&mut self, reason: CloseReason) -> Result<(), Self::Error>;
}

/// A cloneable reference to a connection, used to unsubscribe it.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    route: Route,
    released: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// The connection's identity.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The route the connection watches.
    #[must_use]
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Mark the connection's watch reference as released.
    ///
    /// Returns `true` only for the first call across all clones.
    pub(crate) fn release_watch(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

/// Outcome of a non-blocking push onto an outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    Accepted,
    Full,
    Gone,
}

/// The hub-side half of a subscriber.
#[derive(Debug)]
pub struct Connection {
    handle: ConnectionHandle,
    outbox: mpsc::Sender<Message>,
    closer: oneshot::Sender<CloseReason>,
}

impl Connection {
    /// Create a connection for `route` with an outbox of `capacity` messages.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidCapacity`] if `capacity` is zero.
    pub fn new(route: impl Into<Route>, capacity: usize) -> Result<(Self, Outbox), HubError> {
        if capacity == 0 {
            return Err(HubError::InvalidCapacity("outbox capacity must be at least 1"));
        }

        let (tx, rx) = mpsc::channel(capacity);
        let (closer, close_rx) = oneshot::channel();
        let handle = ConnectionHandle {
            id: ConnectionId::next(),
            route: route.into(),
            released: Arc::new(AtomicBool::new(false)),
        };

        let outbox = Outbox {
            id: handle.id,
            route: handle.route.clone(),
            messages: rx,
            close: close_rx,
            reason: None,
        };

        Ok((
            Self {
                handle,
                outbox: tx,
                closer,
            },
            outbox,
        ))
    }

    /// The connection's identity.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.handle.id
    }

    /// The route the connection watches.
    #[must_use]
    pub fn route(&self) -> &Route {
        &self.handle.route
    }

    /// A handle that can later be passed to `Hub::unsubscribe`.
    #[must_use]
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Maximum number of undelivered messages the outbox buffers.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.outbox.max_capacity()
    }

    /// Try to enqueue a message without waiting.
    pub(crate) fn offer(&self, message: Message) -> Offer {
        match self.outbox.try_send(message) {
            Ok(()) => Offer::Accepted,
            Err(TrySendError::Full(_)) => Offer::Full,
            Err(TrySendError::Closed(_)) => Offer::Gone,
        }
    }

    /// Close the outbox and tell the drain task to shut the transport.
    pub(crate) fn close(self, reason: CloseReason) {
        if self.closer.send(reason).is_err() {
            trace!(connection = %self.handle.id, "Drain task already finished");
        }
    }
}

/// The transport-side half of a subscriber.
#[derive(Debug)]
pub struct Outbox {
    id: ConnectionId,
    route: Route,
    pub(crate) messages: mpsc::Receiver<Message>,
    close: oneshot::Receiver<CloseReason>,
    reason: Option<CloseReason>,
}

impl Outbox {
    /// The connection's identity.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The route the connection watches.
    #[must_use]
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Why the outbox stopped yielding messages, once it has.
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.reason
    }

    /// Receive the next buffered message.
    ///
    /// Returns `None` once the hub has removed the connection. Messages still
    /// buffered at that point are discarded.
    pub async fn recv(&mut self) -> Option<Message> {
        if self.reason.is_some() {
            return None;
        }

        tokio::select! {
            biased;

            reason = &mut self.close => {
                self.reason = Some(reason.unwrap_or(CloseReason::HubStopped));
                None
            }

            message = self.messages.recv() => {
                if message.is_none() {
                    self.reason = Some(CloseReason::HubStopped);
                }
                message
            }
        }
    }

    /// Deliver messages to `transport` in order until the connection ends,
    /// then close the transport.
    ///
    /// Runs independently of the hub; a slow transport only ever fills this
    /// connection's outbox.
    pub async fn drain<T: Transport>(mut self, mut transport: T) -> CloseReason {
        debug!(connection = %self.id, route = %self.route, "Drain started");

        let reason = loop {
            let Some(message) = self.recv().await else {
                break self.reason.unwrap_or(CloseReason::HubStopped);
            };

            // A removal must be able to interrupt a write stuck on a slow client.
            let sent = tokio::select! {
                biased;

                reason = &mut self.close => {
                    let reason = reason.unwrap_or(CloseReason::HubStopped);
                    self.reason = Some(reason);
                    break reason;
                }

                result = transport.send(&message) => result,
            };

            if let Err(e) = sent {
                warn!(connection = %self.id, route = %self.route, error = %e, "Transport send failed");
                self.reason = Some(CloseReason::TransportFailed);
                break CloseReason::TransportFailed;
            }

            trace!(
                connection = %self.id,
                message = message.id(),
                bytes = message.payload_size(),
                "Delivered"
            );
        };

        match tokio::time::timeout(CLOSE_TIMEOUT, transport.close(reason)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(connection = %self.id, error = %e, "Transport close failed"),
            Err(_) => warn!(connection = %self.id, "Transport close timed out"),
        }

        debug!(connection = %self.id, route = %self.route, reason = %reason, "Connection closed");
        reason
    }
}
