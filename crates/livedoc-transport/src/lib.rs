//! # livedoc-transport
//!
//! Binds livedoc hub connections to client sockets.
//!
//! The hub only knows the [`livedoc_core::Transport`] trait. This crate
//! implements it for websocket sinks, turning each hub message into a
//! protocol `Update` frame, and provides the read side helper that watches
//! for the client going away.
//!
//! ```rust,ignore
//! let (sink, stream) = socket.split();
//! let (connection, outbox) = hub.connect(route)?;
//! let handle = connection.handle();
//!
//! tokio::spawn(outbox.drain(WebSocketTransport::new(sink, Encoding::Json)));
//! hub.subscribe(connection).await;
//!
//! read_until_closed(stream).await.ok();
//! hub.unsubscribe(&handle).await;
//! ```

pub mod error;
pub mod websocket;

pub use error::TransportError;
pub use websocket::{read_until_closed, WebSocketTransport};
