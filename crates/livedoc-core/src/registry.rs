//! The set of active connections, owned by the hub's decision loop.

use crate::connection::{CloseReason, Connection, ConnectionId, Offer};
use crate::message::Message;
use crate::route::Route;
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// Result of fanning one message out to a route.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FanOut {
    pub delivered: usize,
    pub evicted: usize,
}

/// Active connections grouped by route.
///
/// Not synchronized: only the decision loop ever touches it.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    routes: HashMap<Route, HashMap<ConnectionId, Connection>>,
    len: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of routes with at least one connection.
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    #[cfg(test)]
    pub fn contains(&self, route: &Route, id: ConnectionId) -> bool {
        self.routes
            .get(route)
            .is_some_and(|bucket| bucket.contains_key(&id))
    }

    pub fn insert(&mut self, connection: Connection) {
        let id = connection.id();
        let route = connection.route().clone();
        let bucket = self.routes.entry(route.clone()).or_default();

        if bucket.insert(id, connection).is_some() {
            // Connections are moved in, so an id can only show up once.
            warn!(connection = %id, route = %route, "Replaced an existing registration");
        } else {
            self.len += 1;
        }

        debug!(connection = %id, route = %route, subscribers = bucket.len(), "Registered");
    }

    /// Remove a connection and close it.
    ///
    /// This is the only place a registered connection is ever closed, for
    /// both unsubscribes and evictions. Removing an absent connection does
    /// nothing and returns `false`.
    pub fn remove(&mut self, route: &Route, id: ConnectionId, reason: CloseReason) -> bool {
        let Some(bucket) = self.routes.get_mut(route) else {
            trace!(connection = %id, route = %route, "Removal of unknown connection ignored");
            return false;
        };
        let Some(connection) = bucket.remove(&id) else {
            trace!(connection = %id, route = %route, "Removal of unknown connection ignored");
            return false;
        };

        if bucket.is_empty() {
            self.routes.remove(route);
        }
        self.len -= 1;

        debug!(connection = %id, route = %route, reason = %reason, "Removed");
        connection.close(reason);
        true
    }

    /// Offer `message` to every connection watching its route.
    ///
    /// Connections that cannot take the message right away are evicted.
    pub fn fan_out(&mut self, message: &Message) -> FanOut {
        let route = message.route();
        let Some(bucket) = self.routes.get(route) else {
            trace!(route = %route, "No subscribers");
            return FanOut::default();
        };

        let mut result = FanOut::default();
        let mut dead = Vec::new();

        for (id, connection) in bucket {
            match connection.offer(message.clone()) {
                Offer::Accepted => result.delivered += 1,
                Offer::Full => {
                    warn!(connection = %id, route = %route, "Outbox full, evicting slow subscriber");
                    dead.push(*id);
                }
                Offer::Gone => {
                    debug!(connection = %id, route = %route, "Outbox receiver gone, evicting");
                    dead.push(*id);
                }
            }
        }

        for id in dead {
            if self.remove(route, id, CloseReason::Evicted) {
                result.evicted += 1;
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove() {
        let mut registry = Registry::new();
        let (conn, _outbox) = Connection::new("/docs/a", 1).unwrap();
        let handle = conn.handle();

        registry.insert(conn);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.route_count(), 1);
        assert!(registry.contains(handle.route(), handle.id()));

        assert!(registry.remove(handle.route(), handle.id(), CloseReason::Unsubscribed));
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.route_count(), 0);

        // Second removal is a no-op.
        assert!(!registry.remove(handle.route(), handle.id(), CloseReason::Unsubscribed));
    }

    #[test]
    fn test_fan_out_matches_route_exactly() {
        let mut registry = Registry::new();
        let (a, mut outbox_a) = Connection::new("/docs/a", 4).unwrap();
        let (nested, mut outbox_nested) = Connection::new("/docs/a/b", 4).unwrap();
        registry.insert(a);
        registry.insert(nested);

        let result = registry.fan_out(&Message::new("/docs/a", "v1"));
        assert_eq!(result, FanOut { delivered: 1, evicted: 0 });

        assert!(outbox_a.messages.try_recv().is_ok());
        assert!(outbox_nested.messages.try_recv().is_err());
    }

    #[test]
    fn test_fan_out_evicts_full_outbox() {
        let mut registry = Registry::new();
        let (slow, _slow_outbox) = Connection::new("/docs/a", 1).unwrap();
        let (fast, mut fast_outbox) = Connection::new("/docs/a", 4).unwrap();
        let slow_handle = slow.handle();
        registry.insert(slow);
        registry.insert(fast);

        assert_eq!(registry.fan_out(&Message::new("/docs/a", "v1")).delivered, 2);

        let result = registry.fan_out(&Message::new("/docs/a", "v2"));
        assert_eq!(result, FanOut { delivered: 1, evicted: 1 });
        assert!(!registry.contains(slow_handle.route(), slow_handle.id()));
        assert_eq!(registry.len(), 1);

        assert!(fast_outbox.messages.try_recv().is_ok());
        assert!(fast_outbox.messages.try_recv().is_ok());
    }

    #[test]
    fn test_fan_out_to_empty_route() {
        let mut registry = Registry::new();
        assert_eq!(registry.fan_out(&Message::new("/nobody", "v1")), FanOut::default());
    }
}
