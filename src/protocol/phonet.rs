//! PhoNet frame header.
//!
//! Stream transports carry ISI messages inside PhoNet frames:
//! ```text
//! ┌───────┬──────┬──────┬──────────┬──────────┬──────┬──────┐
//! │ Media │ RDev │ SDev │ Resource │ Length   │ RObj │ SObj │
//! │ 1 byte│ 1    │ 1    │ 1        │ u16 BE   │ 1    │ 1    │
//! └───────┴──────┴──────┴──────────┴──────────┴──────┴──────┘
//! ```
//!
//! `Length` counts the two object bytes plus the ISI payload, so a frame
//! occupies `6 + length` bytes in total.

use crate::error::{IsiError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const PHONET_HEADER_SIZE: usize = 8;

/// Bytes of the header covered by the length field.
pub const PHONET_LENGTH_BIAS: u16 = 2;

/// Default maximum ISI payload carried by one frame.
pub const DEFAULT_MAX_FRAME_PAYLOAD: u16 = 4096;

/// Default media byte (PhoNet over a host link).
pub const PN_MEDIA_DEFAULT: u8 = 0x1B;

/// Device id of the modem side.
pub const PN_DEV_MODEM: u8 = 0x00;

/// Device id of the host side.
pub const PN_DEV_HOST: u8 = 0x10;

/// Decoded PhoNet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhonetHeader {
    pub media: u8,
    pub receiver_dev: u8,
    pub sender_dev: u8,
    /// ISI resource (server) the message belongs to.
    pub resource: u8,
    /// Object bytes + payload length.
    pub length: u16,
    pub receiver_obj: u8,
    pub sender_obj: u8,
}

impl PhonetHeader {
    /// Header for a payload of `payload_len` bytes.
    ///
    /// Returns `None` if the payload does not fit the length field.
    pub fn for_payload(
        addressing: &PhonetAddress,
        resource: u8,
        payload_len: usize,
    ) -> Option<Self> {
        let length = u16::try_from(payload_len)
            .ok()?
            .checked_add(PHONET_LENGTH_BIAS)?;
        Some(Self {
            media: addressing.media,
            receiver_dev: addressing.remote_dev,
            sender_dev: addressing.local_dev,
            resource,
            length,
            receiver_obj: addressing.remote_obj,
            sender_obj: addressing.local_obj,
        })
    }

    /// ISI payload length carried after the header.
    #[inline]
    pub fn payload_len(&self) -> usize {
        usize::from(self.length.saturating_sub(PHONET_LENGTH_BIAS))
    }

    /// Encode header to bytes.
    pub fn encode(&self) -> [u8; PHONET_HEADER_SIZE] {
        let mut buf = [0u8; PHONET_HEADER_SIZE];
        buf[0] = self.media;
        buf[1] = self.receiver_dev;
        buf[2] = self.sender_dev;
        buf[3] = self.resource;
        buf[4..6].copy_from_slice(&self.length.to_be_bytes());
        buf[6] = self.receiver_obj;
        buf[7] = self.sender_obj;
        buf
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < PHONET_HEADER_SIZE {
            return None;
        }
        Some(Self {
            media: buf[0],
            receiver_dev: buf[1],
            sender_dev: buf[2],
            resource: buf[3],
            length: u16::from_be_bytes([buf[4], buf[5]]),
            receiver_obj: buf[6],
            sender_obj: buf[7],
        })
    }

    /// Validate the header.
    ///
    /// Checks:
    /// - Length covers at least the two object bytes
    /// - Payload doesn't exceed max
    pub fn validate(&self, max_payload: u16) -> Result<()> {
        if self.length < PHONET_LENGTH_BIAS {
            return Err(IsiError::Protocol(format!(
                "PhoNet length {} shorter than object header",
                self.length
            )));
        }

        if self.payload_len() > usize::from(max_payload) {
            return Err(IsiError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_len(),
                max_payload
            )));
        }

        Ok(())
    }
}

/// Device/object addressing applied to outgoing frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhonetAddress {
    pub media: u8,
    pub local_dev: u8,
    pub remote_dev: u8,
    pub local_obj: u8,
    pub remote_obj: u8,
}

impl Default for PhonetAddress {
    fn default() -> Self {
        Self {
            media: PN_MEDIA_DEFAULT,
            local_dev: PN_DEV_HOST,
            remote_dev: PN_DEV_MODEM,
            local_obj: 0x00,
            remote_obj: 0x00,
        }
    }
}

/// Build a complete frame as a single byte vector.
pub fn build_frame(header: &PhonetHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PHONET_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_byte_order() {
        let header = PhonetHeader::for_payload(&PhonetAddress::default(), 0x06, 0x0102).unwrap();
        let bytes = header.encode();

        assert_eq!(bytes[0], PN_MEDIA_DEFAULT);
        assert_eq!(bytes[1], PN_DEV_MODEM);
        assert_eq!(bytes[2], PN_DEV_HOST);
        assert_eq!(bytes[3], 0x06);
        // 0x0102 + 2 in BE
        assert_eq!(bytes[4], 0x01);
        assert_eq!(bytes[5], 0x04);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(PhonetHeader::decode(&[0u8; 7]).is_none());
    }

    #[test]
    fn test_decode_matches_encode() {
        let header = PhonetHeader::for_payload(&PhonetAddress::default(), 0x1B, 3).unwrap();
        assert_eq!(PhonetHeader::decode(&header.encode()), Some(header));
        assert_eq!(header.payload_len(), 3);
    }

    #[test]
    fn test_for_payload_too_large() {
        assert!(PhonetHeader::for_payload(&PhonetAddress::default(), 0x06, 70_000).is_none());
        assert!(PhonetHeader::for_payload(&PhonetAddress::default(), 0x06, 0xFFFF).is_none());
    }

    #[test]
    fn test_validate_short_length_rejected() {
        let mut header = PhonetHeader::for_payload(&PhonetAddress::default(), 0x06, 0).unwrap();
        header.length = 1;
        let result = header.validate(DEFAULT_MAX_FRAME_PAYLOAD);
        assert!(result.unwrap_err().to_string().contains("shorter than object header"));
    }

    #[test]
    fn test_validate_payload_too_large() {
        let header = PhonetHeader::for_payload(&PhonetAddress::default(), 0x06, 200).unwrap();
        assert!(header.validate(100).unwrap_err().to_string().contains("exceeds maximum"));
        assert!(header.validate(200).is_ok());
    }

    #[test]
    fn test_build_frame() {
        let header = PhonetHeader::for_payload(&PhonetAddress::default(), 0x06, 2).unwrap();
        let bytes = build_frame(&header, &[0x01, 0x02]);
        assert_eq!(bytes.len(), PHONET_HEADER_SIZE + 2);
        assert_eq!(&bytes[PHONET_HEADER_SIZE..], &[0x01, 0x02]);
    }
}
