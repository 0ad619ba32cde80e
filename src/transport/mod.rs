//! Transport module - delivery of raw ISI messages to and from the modem.
//!
//! The correlation engine only needs two things from a transport:
//! - a non-blocking [`Transport::send`] for outbound messages
//! - a stream of [`TransportEvent`]s for replies, errors and close
//!
//! Two implementations are provided:
//! - [`StreamTransport`]: PhoNet frames over any `AsyncRead + AsyncWrite`
//! - [`MemoryTransport`]: in-process channels, for embedding and tests
//!
//! Every payload crossing this boundary starts with the one-byte
//! transaction id.

mod memory;
mod stream;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

pub use memory::{MemoryPeer, MemoryTransport};
pub use stream::{StreamConfig, StreamTransport};

/// Receiving half of a transport's event stream.
pub type TransportEvents = mpsc::Receiver<TransportEvent>;

/// A message handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination resource.
    pub resource: u8,
    /// Transaction id followed by the ISI message.
    pub payload: Bytes,
}

impl OutboundMessage {
    /// Transaction id of this message.
    #[inline]
    pub fn transaction_id(&self) -> u8 {
        self.payload.first().copied().unwrap_or_default()
    }

    /// ISI message without the transaction id.
    #[inline]
    pub fn message(&self) -> &[u8] {
        self.payload.get(1..).unwrap_or_default()
    }
}

/// A message received from the modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Resource the message came from.
    pub resource: u8,
    /// Transaction id followed by the ISI message.
    pub payload: Bytes,
}

impl InboundMessage {
    /// Build an inbound message from a transaction id and message body.
    pub fn new(resource: u8, transaction_id: u8, message: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(message.len() + 1);
        payload.push(transaction_id);
        payload.extend_from_slice(message);
        Self {
            resource,
            payload: Bytes::from(payload),
        }
    }
}

/// Everything a transport can report asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A message arrived.
    Message(InboundMessage),
    /// Delivery failed. With a transaction id only that request fails,
    /// otherwise every request on the resource does.
    Error {
        resource: u8,
        transaction_id: Option<u8>,
        reason: String,
    },
    /// The transport is gone; no further events follow.
    Closed,
}

/// Outbound half of a transport.
///
/// `send` must not block. A synchronous refusal is returned as an error
/// and the message is considered not sent.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, message: OutboundMessage) -> Result<()>;
}
