//! The live update hub.
//!
//! The hub is split into a cloneable [`Hub`] handle and a [`HubRunner`] that
//! owns the registry. Producers only ever hold handles; every registry read
//! and write happens on the runner's task, one request at a time, so the
//! registry needs no lock.

use crate::connection::{CloseReason, Connection, ConnectionHandle, Outbox};
use crate::message::Message;
use crate::registry::Registry;
use crate::route::Route;
use crate::watch::WatchService;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// A queue was configured with an unusable capacity.
    #[error("Invalid capacity: {0}")]
    InvalidCapacity(&'static str),

    /// The decision loop is no longer running.
    #[error("Hub is not running")]
    Stopped,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each request queue (subscribe, unsubscribe, broadcast).
    pub request_capacity: usize,
    /// Outbox capacity for connections created through [`Hub::connect`].
    pub outbox_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            request_capacity: 256,
            outbox_capacity: 16,
        }
    }
}

impl HubConfig {
    /// Check that all capacities are usable.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidCapacity`] if any capacity is zero.
    pub fn validate(&self) -> Result<(), HubError> {
        if self.request_capacity == 0 {
            return Err(HubError::InvalidCapacity("request capacity must be at least 1"));
        }
        if self.outbox_capacity == 0 {
            return Err(HubError::InvalidCapacity("outbox capacity must be at least 1"));
        }
        Ok(())
    }
}

/// Hub statistics, as seen by the decision loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Currently registered connections.
    pub connections: usize,
    /// Routes with at least one registered connection.
    pub routes: usize,
    /// Broadcasts processed since start.
    pub broadcasts: u64,
    /// Messages accepted into outboxes since start.
    pub deliveries: u64,
    /// Connections evicted for backpressure since start.
    pub evictions: u64,
}

/// Handle to a running hub.
///
/// Cheap to clone; all clones feed the same decision loop.
#[derive(Clone)]
pub struct Hub {
    watch: Arc<dyn WatchService>,
    subscribe_tx: mpsc::Sender<Connection>,
    unsubscribe_tx: mpsc::Sender<ConnectionHandle>,
    broadcast_tx: mpsc::Sender<Message>,
    stats_tx: mpsc::Sender<oneshot::Sender<HubStats>>,
    outbox_capacity: usize,
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("outbox_capacity", &self.outbox_capacity)
            .field("closed", &self.broadcast_tx.is_closed())
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Create a hub and the runner that drives it.
    ///
    /// The runner must be driven (see [`HubRunner::run`]) for requests to be
    /// processed.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        watch: Arc<dyn WatchService>,
        config: HubConfig,
    ) -> Result<(Self, HubRunner), HubError> {
        config.validate()?;
        info!("Creating hub with config: {:?}", config);

        let capacity = config.request_capacity;
        let (subscribe_tx, subscribe_rx) = mpsc::channel(capacity);
        let (unsubscribe_tx, unsubscribe_rx) = mpsc::channel(capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
        let (stats_tx, stats_rx) = mpsc::channel(capacity);

        let hub = Self {
            watch,
            subscribe_tx,
            unsubscribe_tx,
            broadcast_tx,
            stats_tx,
            outbox_capacity: config.outbox_capacity,
        };

        let runner = HubRunner {
            registry: Registry::new(),
            subscribe_rx,
            unsubscribe_rx,
            broadcast_rx,
            stats_rx,
            broadcasts: 0,
            deliveries: 0,
            evictions: 0,
        };

        Ok((hub, runner))
    }

    /// Create a hub and spawn its runner on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn spawn(watch: Arc<dyn WatchService>, config: HubConfig) -> Result<Self, HubError> {
        let (hub, runner) = Self::new(watch, config)?;
        tokio::spawn(runner.run());
        Ok(hub)
    }

    /// Create a connection for `route` using the hub's outbox capacity.
    ///
    /// # Errors
    ///
    /// Never fails for a validated configuration.
    pub fn connect(&self, route: impl Into<Route>) -> Result<(Connection, Outbox), HubError> {
        Connection::new(route, self.outbox_capacity)
    }

    /// Register a connection.
    ///
    /// Starts watching the connection's route, then queues the registration.
    /// The connection is registered before any broadcast queued after this
    /// call returns is fanned out.
    pub async fn subscribe(&self, connection: Connection) {
        let handle = connection.handle();
        self.watch.start_watching(handle.route());

        if self.subscribe_tx.send(connection).await.is_err() {
            // Dropping the returned connection ends its drain task.
            warn!(connection = %handle.id(), route = %handle.route(), "Hub stopped, subscription dropped");
            if handle.release_watch() {
                self.watch.stop_watching(handle.route());
            }
            return;
        }

        trace!(connection = %handle.id(), route = %handle.route(), "Subscribe queued");
    }

    /// Remove a connection.
    ///
    /// Stops watching the connection's route, then queues the removal.
    /// Unsubscribing a connection that was already removed (including one
    /// evicted for backpressure) is a no-op for the registry, and the watch
    /// service only ever sees one stop per connection.
    pub async fn unsubscribe(&self, handle: &ConnectionHandle) {
        if handle.release_watch() {
            self.watch.stop_watching(handle.route());
        } else {
            trace!(connection = %handle.id(), "Watch already released");
        }

        if self.unsubscribe_tx.send(handle.clone()).await.is_err() {
            debug!(connection = %handle.id(), "Hub stopped, unsubscribe dropped");
        }
    }

    /// Queue a message for fan-out to every connection on its route.
    ///
    /// Waits only while the broadcast queue is full. Delivery is best-effort
    /// and never reported back.
    pub async fn broadcast(&self, message: Message) {
        if let Err(mpsc::error::SendError(message)) = self.broadcast_tx.send(message).await {
            debug!(route = %message.route(), "Hub stopped, broadcast dropped");
        }
    }

    /// Queue a message for fan-out without waiting.
    ///
    /// Returns `false` if the message was dropped because the broadcast queue
    /// is full or the hub has stopped.
    pub fn try_broadcast(&self, message: Message) -> bool {
        match self.broadcast_tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                debug!(route = %message.route(), "Broadcast queue full, dropping");
                false
            }
            Err(TrySendError::Closed(message)) => {
                debug!(route = %message.route(), "Hub stopped, broadcast dropped");
                false
            }
        }
    }

    /// Ask the decision loop for its statistics.
    ///
    /// The query is answered after every subscribe, unsubscribe and broadcast
    /// already queued.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the loop is not running.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (tx, rx) = oneshot::channel();
        self.stats_tx.send(tx).await.map_err(|_| HubError::Stopped)?;
        rx.await.map_err(|_| HubError::Stopped)
    }
}

/// The hub's decision loop and the registry it owns.
pub struct HubRunner {
    registry: Registry,
    subscribe_rx: mpsc::Receiver<Connection>,
    unsubscribe_rx: mpsc::Receiver<ConnectionHandle>,
    broadcast_rx: mpsc::Receiver<Message>,
    stats_rx: mpsc::Receiver<oneshot::Sender<HubStats>>,
    broadcasts: u64,
    deliveries: u64,
    evictions: u64,
}

impl HubRunner {
    /// Process requests until every [`Hub`] handle has been dropped.
    ///
    /// Registrations are served first, then removals, then broadcasts, then
    /// statistics queries.
    pub async fn run(mut self) {
        info!("Hub running");

        loop {
            tokio::select! {
                biased;

                Some(connection) = self.subscribe_rx.recv() => {
                    self.registry.insert(connection);
                }

                Some(handle) = self.unsubscribe_rx.recv() => {
                    self.registry.remove(handle.route(), handle.id(), CloseReason::Unsubscribed);
                }

                Some(message) = self.broadcast_rx.recv() => {
                    self.fan_out(&message);
                }

                Some(reply) = self.stats_rx.recv() => {
                    let _ = reply.send(self.stats());
                }

                else => break,
            }
        }

        info!(connections = self.registry.len(), "Hub stopped");
    }

    fn fan_out(&mut self, message: &Message) {
        let result = self.registry.fan_out(message);

        self.broadcasts += 1;
        self.deliveries += result.delivered as u64;
        self.evictions += result.evicted as u64;

        debug!(
            route = %message.route(),
            message = message.id(),
            recipients = result.delivered,
            evicted = result.evicted,
            "Broadcast"
        );
    }

    fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.len(),
            routes: self.registry.route_count(),
            broadcasts: self.broadcasts,
            deliveries: self.deliveries,
            evictions: self.evictions,
        }
    }
}
