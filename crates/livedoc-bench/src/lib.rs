//! Fixtures shared by the livedoc benchmarks.

use livedoc_core::{Hub, HubConfig, HubError, NoopWatcher, Outbox};
use std::sync::Arc;

/// A running hub with subscribers on a single route.
pub struct Fixture {
    /// Handle to the hub.
    pub hub: Hub,
    /// The subscribers' outboxes, in subscription order.
    pub outboxes: Vec<Outbox>,
}

/// Spawn a hub and subscribe `subscribers` connections to `route`.
///
/// Must be called inside a tokio runtime.
///
/// # Errors
///
/// Returns an error if `outbox_capacity` is zero.
pub async fn subscribed_hub(
    route: &str,
    subscribers: usize,
    outbox_capacity: usize,
) -> Result<Fixture, HubError> {
    let config = HubConfig {
        outbox_capacity,
        ..HubConfig::default()
    };
    let hub = Hub::spawn(Arc::new(NoopWatcher), config)?;

    let mut outboxes = Vec::with_capacity(subscribers);
    for _ in 0..subscribers {
        let (connection, outbox) = hub.connect(route)?;
        hub.subscribe(connection).await;
        outboxes.push(outbox);
    }

    Ok(Fixture { hub, outboxes })
}

/// Receive one message on every outbox.
pub async fn drain_once(outboxes: &mut [Outbox]) -> usize {
    let mut received = 0;
    for outbox in outboxes.iter_mut() {
        if outbox.recv().await.is_some() {
            received += 1;
        }
    }
    received
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedoc_core::Message;

    #[tokio::test]
    async fn test_fixture_delivers_to_every_subscriber() {
        let mut fixture = subscribed_hub("/docs/a", 3, 4).await.unwrap();
        fixture.hub.broadcast(Message::new("/docs/a", "v1")).await;
        assert_eq!(drain_once(&mut fixture.outboxes).await, 3);
    }

    #[tokio::test]
    async fn test_fixture_rejects_zero_capacity() {
        assert!(subscribed_hub("/docs/a", 1, 0).await.is_err());
    }
}
