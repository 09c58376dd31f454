//! WebSocket transport implementation.
//!
//! Works on the two halves of a split axum websocket: the sink is wrapped in
//! a [`WebSocketTransport`] and handed to the connection's drain task, the
//! stream is watched by [`read_until_closed`].

use crate::error::TransportError;
use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use livedoc_core::{CloseReason, Transport};
use livedoc_protocol::{codec, Encoding, Frame};
use std::borrow::Cow;
use std::fmt;
use tracing::{debug, trace, warn};

/// Encode a frame as a websocket message.
///
/// # Errors
///
/// Returns an error if the frame cannot be encoded.
pub fn encode_message(frame: &Frame, encoding: Encoding) -> Result<Message, TransportError> {
    let message = match encoding {
        Encoding::Json => Message::Text(codec::encode_json(frame)?),
        Encoding::MessagePack => Message::Binary(codec::encode(frame)?.to_vec()),
    };
    Ok(message)
}

/// Websocket close code announcing why the server ended the session.
#[must_use]
pub fn close_code_for(reason: CloseReason) -> u16 {
    match reason {
        CloseReason::Unsubscribed => close_code::NORMAL,
        // Tells the client to come back later and resubscribe.
        CloseReason::Evicted => close_code::AGAIN,
        CloseReason::TransportFailed => close_code::ERROR,
        CloseReason::HubStopped => close_code::AWAY,
    }
}

/// The write half of a websocket, pushing hub messages as `Update` frames.
pub struct WebSocketTransport<S> {
    sink: S,
    encoding: Encoding,
    is_open: bool,
}

impl<S> WebSocketTransport<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: fmt::Display + Send,
{
    /// Wrap a websocket sink.
    #[must_use]
    pub fn new(sink: S, encoding: Encoding) -> Self {
        Self {
            sink,
            encoding,
            is_open: true,
        }
    }

    /// The frame encoding in use.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Check if the transport has not been closed yet.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Send a protocol frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is closed, the frame cannot be
    /// encoded, or the socket rejects the write.
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let message = encode_message(frame, self.encoding)?;
        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Give back the underlying sink.
    pub fn into_inner(self) -> S {
        self.sink
    }
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: fmt::Display + Send,
{
    type Error = TransportError;

    async fn send(&mut self, message: &livedoc_core::Message) -> Result<(), Self::Error> {
        let frame = Frame::update(message.route().as_str(), message.payload().clone());
        match self.send_frame(&frame).await {
            // The socket is still healthy; only this update is unusable.
            Err(TransportError::Protocol(e)) => {
                warn!(
                    route = %message.route(),
                    message = message.id(),
                    error = %e,
                    "Dropping update that cannot be encoded"
                );
                Ok(())
            }
            result => result,
        }
    }

    async fn close(&mut self, reason: CloseReason) -> Result<(), Self::Error> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(()); // Already closed
        }

        let frame = CloseFrame {
            code: close_code_for(reason),
            reason: Cow::Borrowed(reason.as_str()),
        };
        self.sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }
}

/// Consume the read half of a websocket until the client goes away.
///
/// Sessions are push-only, so anything the client sends besides control
/// frames is ignored. Returns `Ok` on a clean close or end of stream.
///
/// # Errors
///
/// Returns an error if the socket fails while reading.
pub async fn read_until_closed<St, E>(mut stream: St) -> Result<(), TransportError>
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Close(frame)) => {
                debug!(code = ?frame.as_ref().map(|f| f.code), "Received close frame");
                return Ok(());
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Answered by the websocket layer
            }
            Ok(Message::Text(_)) | Ok(Message::Binary(_)) => {
                trace!("Ignoring client data frame");
            }
            Err(e) => {
                warn!(error = %e, "WebSocket error");
                return Err(TransportError::ReceiveFailed(e.to_string()));
            }
        }
    }

    debug!("WebSocket stream ended");
    Ok(())
}
