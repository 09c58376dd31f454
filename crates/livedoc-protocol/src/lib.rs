//! # livedoc-protocol
//!
//! Wire protocol for pushing document updates to browser sessions.
//!
//! A session watches exactly one route, chosen when the socket is opened, so
//! the protocol is push-only:
//!
//! - `Connected` - Sent once after the socket is upgraded
//! - `Update` - A new rendering of the watched document
//!
//! Frames travel either as JSON text messages (what browsers consume) or as
//! length-prefixed MessagePack binary messages.
//!
//! ## Example
//!
//! ```rust
//! use livedoc_protocol::{codec, Frame};
//!
//! let frame = Frame::update("/docs/a", "<h1>Hello</h1>");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! assert_eq!(codec::decode(&encoded).unwrap(), frame);
//!
//! let json = codec::encode_json(&frame).unwrap();
//! assert_eq!(codec::decode_json(&json).unwrap(), frame);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, Encoding, ProtocolError};
pub use frames::{Frame, Payload, PROTOCOL_VERSION};
