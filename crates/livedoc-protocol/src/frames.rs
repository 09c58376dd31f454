//! Frame types for the livedoc protocol.

use bytes::Bytes;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{Error as _, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current protocol version, announced in [`Frame::Connected`].
pub const PROTOCOL_VERSION: u8 = 1;

/// An opaque rendered document.
///
/// Serialized as a string for human-readable formats (JSON) and as raw bytes
/// otherwise (MessagePack). Payloads sent as JSON must be valid UTF-8.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Payload(Bytes);

impl Payload {
    /// Get the payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    /// Take the payload bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({} bytes)", self.0.len())
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&'static str> for Payload {
    fn from(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            let text = std::str::from_utf8(&self.0)
                .map_err(|_| S::Error::custom("payload is not valid UTF-8"))?;
            serializer.serialize_str(text)
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

// Frames are internally tagged, so the payload may reach us through serde's
// buffered content rather than the real format. Accept strings and bytes
// either way instead of trusting `is_human_readable` here.
struct PayloadVisitor;

impl<'de> Visitor<'de> for PayloadVisitor {
    type Value = Payload;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string or byte array")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Payload, E> {
        Ok(Payload::from(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Payload, E> {
        Ok(Payload::from(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Payload, E> {
        Ok(Payload::from(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Payload, E> {
        Ok(Payload::from(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Payload, A::Error> {
        let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(byte) = seq.next_element::<u8>()? {
            bytes.push(byte);
        }
        Ok(Payload::from(bytes))
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PayloadVisitor)
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Session established.
    #[serde(rename = "connected")]
    Connected {
        /// Server-assigned connection identifier.
        connection_id: String,
        /// The route this session watches.
        route: String,
        /// Protocol version spoken by the server.
        version: u8,
    },

    /// The watched document changed.
    #[serde(rename = "update")]
    Update {
        /// Route of the changed document.
        route: String,
        /// The new rendering.
        payload: Payload,
    },
}

impl Frame {
    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, route: impl Into<String>) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            route: route.into(),
            version: PROTOCOL_VERSION,
        }
    }

    /// Create a new Update frame.
    #[must_use]
    pub fn update(route: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Frame::Update {
            route: route.into(),
            payload: payload.into(),
        }
    }

    /// Frame name as used in the `type` tag.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Connected { .. } => "connected",
            Frame::Update { .. } => "update",
        }
    }
}
