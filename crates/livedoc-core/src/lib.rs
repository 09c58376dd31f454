//! # livedoc-core
//!
//! The live update hub of livedoc.
//!
//! This crate provides the building blocks for pushing document changes to
//! open browser sessions:
//!
//! - **Route** - Canonical document identifier used as the subscription key
//! - **Message** - Immutable route + payload envelope
//! - **Connection** - A subscriber with a bounded outbox and a drain task
//! - **Hub** - Single decision loop owning all subscription state
//! - **WatchService** - Boundary to whatever monitors the content store
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  subscribe   ┌─────────────┐  start/stop  ┌──────────────┐
//! │  Connection │─────────────▶│     Hub     │─────────────▶│ WatchService │
//! └─────────────┘  unsubscribe └─────────────┘              └──────────────┘
//!        ▲                            │  ▲
//!        │ try_send (never blocks)    │  │ broadcast
//!        └────────────────────────────┘  └──── change producers
//! ```
//!
//! All registry reads and writes happen inside [`HubRunner::run`]; every
//! other component talks to it through bounded request channels.

pub mod connection;
pub mod hub;
pub mod message;
mod registry;
pub mod route;
pub mod watch;

pub use connection::{CloseReason, Connection, ConnectionHandle, ConnectionId, Outbox, Transport};
pub use hub::{Hub, HubConfig, HubError, HubRunner, HubStats};
pub use message::Message;
pub use route::Route;
pub use watch::{NoopWatcher, WatchService};
