//! Content store watcher.
//!
//! [`ContentWatcher`] implements the hub's [`WatchService`] by polling the
//! document behind each watched route. A route watched by several sessions
//! shares one polling task. Detected changes are sent as routes on a channel
//! that [`forward_changes`] turns into hub broadcasts.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use livedoc_core::{Hub, Message, Route, WatchService};
use livedoc_protocol::Encoding;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::metrics;

/// File served for a route that names a directory.
pub const INDEX_FILE: &str = "index.md";

/// Extension tried when a route has no file of its own.
pub const DOCUMENT_EXTENSION: &str = "md";

/// Pending change notifications before pollers wait.
const CHANGE_QUEUE_CAPACITY: usize = 64;

/// Maps routes to documents under a content root.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
    max_document_size: u64,
}

impl ContentStore {
    /// Create a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, max_document_size: u64) -> Self {
        Self {
            root: root.into(),
            max_document_size,
        }
    }

    /// The path a route maps to, before any lookup.
    ///
    /// `.` and `..` segments are skipped, so the result never leaves the root.
    #[must_use]
    pub fn resolve(&self, route: &Route) -> PathBuf {
        route
            .segments()
            .filter(|segment| *segment != "." && *segment != "..")
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    /// Read the current document for `route`.
    ///
    /// Returns `Ok(None)` if no document exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is too large or cannot be read.
    pub async fn load(&self, route: &Route) -> Result<Option<Bytes>> {
        let Some(path) = locate(&self.root, &self.resolve(route)).await else {
            return Ok(None);
        };

        let size = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len();
        if size > self.max_document_size {
            bail!(
                "Document {} is {} bytes, limit is {}",
                path.display(),
                size,
                self.max_document_size
            );
        }

        let contents = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(Bytes::from(contents)))
    }
}

/// Find the document file for a resolved route path under `root`.
///
/// Tries the path itself, the path with the document extension, then the
/// index file inside it. The root itself only has an index file: appending
/// the extension to it would name a sibling outside the root.
async fn locate(root: &Path, path: &Path) -> Option<PathBuf> {
    let mut candidates = vec![path.to_path_buf()];
    if path != root {
        let mut with_extension = OsString::from(path.as_os_str());
        with_extension.push(".");
        with_extension.push(DOCUMENT_EXTENSION);
        candidates.push(PathBuf::from(with_extension));
    }
    candidates.push(path.join(INDEX_FILE));

    for candidate in candidates {
        if let Ok(metadata) = tokio::fs::metadata(&candidate).await {
            if metadata.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// What a poller compares between ticks.
#[derive(Debug, PartialEq, Eq)]
struct Fingerprint {
    path: PathBuf,
    modified: Option<SystemTime>,
    len: u64,
}

async fn fingerprint(root: &Path, path: &Path) -> Option<Fingerprint> {
    let path = locate(root, path).await?;
    let metadata = tokio::fs::metadata(&path).await.ok()?;
    Some(Fingerprint {
        modified: metadata.modified().ok(),
        len: metadata.len(),
        path,
    })
}

struct Watch {
    refs: usize,
    task: JoinHandle<()>,
}

/// Polling [`WatchService`] over a [`ContentStore`].
pub struct ContentWatcher {
    store: ContentStore,
    interval: Duration,
    changes: mpsc::Sender<Route>,
    watched: DashMap<Route, Watch>,
}

impl ContentWatcher {
    /// Create a watcher and the receiving end of its change channel.
    #[must_use]
    pub fn new(store: ContentStore, interval: Duration) -> (Self, mpsc::Receiver<Route>) {
        let (changes, rx) = mpsc::channel(CHANGE_QUEUE_CAPACITY);
        let watcher = Self {
            store,
            interval,
            changes,
            watched: DashMap::new(),
        };
        (watcher, rx)
    }

    /// Number of routes currently polled.
    #[must_use]
    pub fn watched_routes(&self) -> usize {
        self.watched.len()
    }

    /// Number of sessions watching `route`.
    #[must_use]
    pub fn watchers(&self, route: &Route) -> usize {
        self.watched.get(route).map_or(0, |watch| watch.refs)
    }
}

impl WatchService for ContentWatcher {
    fn start_watching(&self, route: &Route) {
        match self.watched.entry(route.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().refs += 1;
                trace!(route = %route, refs = entry.get().refs, "Route already watched");
            }
            Entry::Vacant(entry) => {
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    warn!(route = %route, "No runtime, cannot watch route");
                    return;
                };
                let task = runtime.spawn(poll_document(
                    self.store.root.clone(),
                    self.store.resolve(route),
                    route.clone(),
                    self.interval,
                    self.changes.clone(),
                ));
                entry.insert(Watch { refs: 1, task });
                debug!(route = %route, "Started watching");
            }
        }
    }

    fn stop_watching(&self, route: &Route) {
        let Entry::Occupied(mut entry) = self.watched.entry(route.clone()) else {
            trace!(route = %route, "Route not watched");
            return;
        };

        entry.get_mut().refs -= 1;
        if entry.get().refs == 0 {
            entry.remove().task.abort();
            debug!(route = %route, "Stopped watching");
        }
    }
}

impl Drop for ContentWatcher {
    fn drop(&mut self) {
        for watch in self.watched.iter() {
            watch.task.abort();
        }
    }
}

/// Poll one document, sending its route whenever its fingerprint changes.
async fn poll_document(
    root: PathBuf,
    path: PathBuf,
    route: Route,
    every: Duration,
    changes: mpsc::Sender<Route>,
) {
    let mut last = fingerprint(&root, &path).await;
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let current = fingerprint(&root, &path).await;
        if current == last {
            continue;
        }
        last = current;

        trace!(route = %route, "Document changed");
        if changes.send(route.clone()).await.is_err() {
            break;
        }
    }
}

/// Broadcast the new document for every changed route.
///
/// Documents that sessions using `encoding` cannot receive are skipped.
/// Runs until every sender of the change channel is gone.
pub async fn forward_changes(
    store: ContentStore,
    mut changes: mpsc::Receiver<Route>,
    hub: Hub,
    encoding: Encoding,
) {
    while let Some(route) = changes.recv().await {
        metrics::record_content_change();

        match store.load(&route).await {
            Ok(Some(document)) if !encoding.can_carry(&document) => {
                metrics::record_error("content");
                warn!(route = %route, ?encoding, "Document is not valid for the session encoding, skipping");
            }
            Ok(Some(document)) => hub.broadcast(Message::new(route, document)).await,
            Ok(None) => debug!(route = %route, "Document removed, nothing to push"),
            Err(e) => {
                metrics::record_error("content");
                warn!(route = %route, error = %e, "Failed to load document");
            }
        }
    }

    debug!("Change channel closed");
}
