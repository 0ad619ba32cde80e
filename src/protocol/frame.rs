//! PhoNet frame with typed accessors.
//!
//! Uses `bytes::Bytes` so the ISI payload can be routed to a pending
//! request without copying.

use bytes::Bytes;

use super::phonet::PhonetHeader;

/// A complete PhoNet frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: PhonetHeader,
    /// ISI payload (transaction id first).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: PhonetHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// ISI resource of this frame.
    #[inline]
    pub fn resource(&self) -> u8 {
        self.header.resource
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Transaction id, if the payload is not empty.
    #[inline]
    pub fn transaction_id(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// ISI message id, if present.
    #[inline]
    pub fn message_id(&self) -> Option<u8> {
        self.payload.get(1).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PhonetAddress;

    #[test]
    fn test_frame_accessors() {
        let header = PhonetHeader::for_payload(&PhonetAddress::default(), 0x06, 3).unwrap();
        let frame = Frame::new(header, Bytes::from_static(&[0x07, 0x01, 0x05]));

        assert_eq!(frame.resource(), 0x06);
        assert_eq!(frame.transaction_id(), Some(0x07));
        assert_eq!(frame.message_id(), Some(0x01));
        assert_eq!(frame.payload(), &[0x07, 0x01, 0x05]);
    }

    #[test]
    fn test_frame_empty_payload() {
        let header = PhonetHeader::for_payload(&PhonetAddress::default(), 0x06, 0).unwrap();
        let frame = Frame::new(header, Bytes::new());

        assert_eq!(frame.transaction_id(), None);
        assert_eq!(frame.message_id(), None);
    }
}
