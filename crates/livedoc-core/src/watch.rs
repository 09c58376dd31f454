//! Boundary to the service that monitors the content store.

use crate::route::Route;

/// Starts and stops change monitoring for a route.
///
/// The hub calls these synchronously, once per connection: `start_watching`
/// from `subscribe`, and `stop_watching` from the first `unsubscribe` of that
/// connection. Later unsubscribes of the same connection, from any clone of
/// its handle, do not stop the route again, so every start is matched by at
/// most one stop. Both operations must be idempotent from the hub's point of
/// view: starting a route twice or stopping a route nobody watches is not an
/// error. Any reference counting is the implementation's business.
///
/// Change events do not flow back through this trait; whatever observes the
/// content store reports them through `Hub::broadcast`.
pub trait WatchService: Send + Sync {
    /// Begin monitoring `route` for changes.
    fn start_watching(&self, route: &Route);

    /// Stop monitoring `route`.
    fn stop_watching(&self, route: &Route);
}

/// A watch service that monitors nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWatcher;

impl WatchService for NoopWatcher {
    fn start_watching(&self, _route: &Route) {}

    fn stop_watching(&self, _route: &Route) {}
}
