//! Change notifications pushed through the hub.

use crate::route::Route;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A unique message identifier.
pub type MessageId = u64;

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a process-unique message ID.
#[must_use]
pub fn generate_message_id() -> MessageId {
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// An immutable envelope pairing a route with a rendered payload.
///
/// The payload is opaque to the hub. Cloning is cheap: both the route and
/// the payload are reference counted, so fan-out to many connections never
/// copies the payload.
#[derive(Debug, Clone)]
pub struct Message {
    id: MessageId,
    route: Route,
    payload: Bytes,
    timestamp: u64,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(route: impl Into<Route>, payload: impl Into<Bytes>) -> Self {
        Self {
            id: generate_message_id(),
            route: route.into(),
            payload: payload.into(),
            timestamp: now_millis(),
        }
    }

    /// Unique message identifier.
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// The route this message is addressed to.
    #[must_use]
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Get the payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Get the payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Creation time in milliseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Milliseconds elapsed since the message was created.
    #[must_use]
    pub fn age_millis(&self) -> u64 {
        now_millis().saturating_sub(self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::new("/docs/a", b"v1".to_vec());
        assert_eq!(msg.route().as_str(), "/docs/a");
        assert_eq!(&msg.payload()[..], b"v1");
        assert_eq!(msg.payload_size(), 2);
        assert!(msg.timestamp() > 0);
    }

    #[test]
    fn test_unique_message_ids() {
        let a = Message::new("/a", Bytes::new());
        let b = Message::new("/a", Bytes::new());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_clone_shares_payload() {
        let msg = Message::new("/docs/a", Bytes::from_static(b"shared"));
        let copy = msg.clone();
        assert_eq!(msg.payload().as_ptr(), copy.payload().as_ptr());
        assert_eq!(msg.id(), copy.id());
    }
}
