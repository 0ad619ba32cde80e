//! In-process transport.
//!
//! [`MemoryTransport`] hands outbound messages to a [`MemoryPeer`], which
//! plays the modem: it reads what was sent and injects replies, errors or
//! a close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{InboundMessage, OutboundMessage, Transport, TransportEvent, TransportEvents};
use crate::error::{IsiError, Result};

/// Transport backed by in-process channels.
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    refuse: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Create a transport, its event stream and the peer driving it.
    pub fn pair(event_capacity: usize) -> (Self, TransportEvents, MemoryPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(event_capacity.max(1));
        let refuse = Arc::new(AtomicBool::new(false));

        let transport = Self {
            outbound: outbound_tx,
            refuse: refuse.clone(),
        };
        let peer = MemoryPeer {
            outbound: outbound_rx,
            events: events_tx,
            refuse,
        };

        (transport, events_rx, peer)
    }
}

impl Transport for MemoryTransport {
    fn send(&self, message: OutboundMessage) -> Result<()> {
        if self.refuse.load(Ordering::Acquire) {
            return Err(IsiError::Transport("send refused".to_string()));
        }
        self.outbound
            .send(message)
            .map_err(|_| IsiError::ConnectionClosed)
    }
}

/// Modem side of a [`MemoryTransport`].
pub struct MemoryPeer {
    outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    events: mpsc::Sender<TransportEvent>,
    refuse: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Next message sent by the host, waiting if none is queued.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        self.outbound.recv().await
    }

    /// Next queued message, if any.
    pub fn try_recv(&mut self) -> Option<OutboundMessage> {
        self.outbound.try_recv().ok()
    }

    /// Answer `request` with `message` on its own resource and transaction id.
    pub async fn reply(&self, request: &OutboundMessage, message: &[u8]) -> Result<()> {
        self.deliver(InboundMessage::new(
            request.resource,
            request.transaction_id(),
            message,
        ))
        .await
    }

    /// Deliver an arbitrary inbound message.
    pub async fn deliver(&self, message: InboundMessage) -> Result<()> {
        self.inject(TransportEvent::Message(message)).await
    }

    /// Report a delivery failure.
    pub async fn fail(&self, resource: u8, transaction_id: Option<u8>, reason: &str) -> Result<()> {
        self.inject(TransportEvent::Error {
            resource,
            transaction_id,
            reason: reason.to_string(),
        })
        .await
    }

    /// Close the transport.
    pub async fn close(&self) -> Result<()> {
        self.inject(TransportEvent::Closed).await
    }

    /// Inject any event.
    pub async fn inject(&self, event: TransportEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| IsiError::ConnectionClosed)
    }

    /// Make subsequent sends fail synchronously.
    pub fn set_refuse_sends(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::Release);
    }
}
