//! Request assembly and response envelope validation.
//!
//! Requests have a fixed layout:
//! ```text
//! ┌────────┬──────────────────┬───────┬────────────────────┐
//! │ Opcode │ Fixed parameters │ Count │ Sub-blocks ...     │
//! │ 1 byte │ per message      │ 1 byte│ tag, len, payload  │
//! └────────┴──────────────────┴───────┴────────────────────┘
//! ```
//!
//! Responses start with the response opcode followed by either an
//! operation sub-code or a status byte. A response must pass
//! [`Envelope::validate`] before its sub-blocks can be read.
//!
//! # Example
//!
//! ```
//! use isi_client::protocol::{Envelope, MessageBuilder, ResponseShape, SecondByte, SubBlockLayout};
//!
//! let request = MessageBuilder::new(0x00)
//!     .byte(0x05)
//!     .u16_be(33)
//!     .sub_block_count()
//!     .build();
//! assert_eq!(&request[..], &[0x00, 0x05, 0x00, 0x21, 0x00]);
//!
//! let shape = ResponseShape {
//!     min_len: 3,
//!     opcode: 0x01,
//!     second: SecondByte::Status { ok: 0x00 },
//!     layout: SubBlockLayout::Byte,
//! };
//! let envelope = Envelope::validate(&[0x01, 0x00, 0x00], &shape).unwrap();
//! assert_eq!(envelope.sub_blocks(3).count(), 0);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::field;
use super::subblock::{SubBlockIter, SubBlockLayout};
use crate::error::{IsiError, Result};

/// Fluent builder for a request buffer.
#[derive(Debug)]
pub struct MessageBuilder {
    buf: BytesMut,
    layout: SubBlockLayout,
    count_at: Option<usize>,
}

impl MessageBuilder {
    /// Start a request with the given opcode and byte-tagged sub-blocks.
    pub fn new(opcode: u8) -> Self {
        Self::with_layout(opcode, SubBlockLayout::Byte)
    }

    /// Start a request with an explicit sub-block layout.
    pub fn with_layout(opcode: u8, layout: SubBlockLayout) -> Self {
        let mut buf = BytesMut::with_capacity(32);
        buf.put_u8(opcode);
        Self {
            buf,
            layout,
            count_at: None,
        }
    }

    /// Append a fixed byte parameter.
    pub fn byte(mut self, value: u8) -> Self {
        self.buf.put_u8(value);
        self
    }

    /// Append a fixed Big Endian u16 parameter.
    pub fn u16_be(mut self, value: u16) -> Self {
        self.buf.put_slice(&field::write_u16_be(value));
        self
    }

    /// Append raw fixed bytes.
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.buf.put_slice(data);
        self
    }

    /// Reserve the sub-block count byte at the current position.
    ///
    /// Every following `sub_block` call increments it.
    pub fn sub_block_count(mut self) -> Self {
        self.count_at = Some(self.buf.len());
        self.buf.put_u8(0);
        self
    }

    /// Append a sub-block whose length is header + payload.
    pub fn sub_block(self, tag: u16, payload: &[u8]) -> Result<Self> {
        let len = self.layout.header_size() + payload.len();
        self.padded_sub_block(tag, payload, len)
    }

    /// Append a sub-block of declared length `len`, zero-filling after the payload.
    pub fn padded_sub_block(mut self, tag: u16, payload: &[u8], len: usize) -> Result<Self> {
        let header = self.layout.header_size();
        if len < header + payload.len() || len > usize::from(u8::MAX) {
            return Err(IsiError::invalid(format!(
                "sub-block 0x{:02X} length {} cannot hold {} payload bytes",
                tag,
                len,
                payload.len()
            )));
        }

        let count_at = self
            .count_at
            .ok_or_else(|| IsiError::invalid("sub-block appended before count was reserved"))?;
        if self.buf[count_at] == u8::MAX {
            return Err(IsiError::invalid("too many sub-blocks"));
        }
        self.buf[count_at] += 1;

        match self.layout {
            SubBlockLayout::Byte => {
                let tag = u8::try_from(tag)
                    .map_err(|_| IsiError::invalid(format!("tag 0x{:04X} exceeds one byte", tag)))?;
                self.buf.put_u8(tag);
            }
            SubBlockLayout::Word => self.buf.put_u16(tag),
        }
        self.buf.put_u8(len as u8);
        self.buf.put_slice(payload);
        self.buf.put_bytes(0, len - header - payload.len());

        Ok(self)
    }

    /// Current request length.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether only the opcode has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.len() <= 1
    }

    /// Freeze into an immutable request.
    pub fn build(self) -> Bytes {
        self.buf.freeze()
    }
}

/// What the byte after the response opcode means for a message family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondByte<'a> {
    /// Operation echo; one of these values is accepted.
    Operation(&'a [u8]),
    /// Status byte; only `ok` means success.
    Status { ok: u8 },
    /// Not checked.
    Any,
}

/// Expected shape of a response to one request.
#[derive(Debug, Clone, Copy)]
pub struct ResponseShape<'a> {
    /// Shortest acceptable response.
    pub min_len: usize,
    /// Response ("completed") opcode.
    pub opcode: u8,
    /// Interpretation of byte 1.
    pub second: SecondByte<'a>,
    /// Sub-block header shape for this family.
    pub layout: SubBlockLayout,
}

/// A response that passed envelope validation.
#[derive(Debug, Clone, Copy)]
pub struct Envelope<'a> {
    data: &'a [u8],
    layout: SubBlockLayout,
}

impl<'a> Envelope<'a> {
    /// Validate `data` against `shape`.
    ///
    /// Checks, in order: minimum length, opcode, then the second byte.
    pub fn validate(data: &'a [u8], shape: &ResponseShape<'_>) -> Result<Self> {
        if data.len() < shape.min_len.max(1) {
            return Err(IsiError::malformed(format!(
                "response of {} bytes shorter than {}",
                data.len(),
                shape.min_len
            )));
        }

        if data[0] != shape.opcode {
            return Err(IsiError::UnexpectedOpcode {
                expected: shape.opcode,
                actual: data[0],
            });
        }

        match shape.second {
            SecondByte::Any => {}
            SecondByte::Operation(accepted) => {
                let actual = field::read_byte(data, 1)?;
                if !accepted.contains(&actual) {
                    return Err(IsiError::UnexpectedOpcode {
                        expected: accepted.first().copied().unwrap_or_default(),
                        actual,
                    });
                }
            }
            SecondByte::Status { ok } => {
                let status = field::read_byte(data, 1)?;
                if status != ok {
                    return Err(IsiError::StatusNotOk(status));
                }
            }
        }

        Ok(Self {
            data,
            layout: shape.layout,
        })
    }

    /// Response opcode.
    #[inline]
    pub fn opcode(&self) -> u8 {
        self.data[0]
    }

    /// Full response bytes.
    #[inline]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    #[inline]
    pub fn byte(&self, offset: usize) -> Result<u8> {
        field::read_byte(self.data, offset)
    }

    /// Iterate sub-blocks starting at `start` (count at `start - 1`).
    pub fn sub_blocks(&self, start: usize) -> SubBlockIter<'a> {
        SubBlockIter::new(self.data, start, self.layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_shape() -> ResponseShape<'static> {
        ResponseShape {
            min_len: 3,
            opcode: 0x16,
            second: SecondByte::Status { ok: 0x00 },
            layout: SubBlockLayout::Byte,
        }
    }

    #[test]
    fn test_build_fixed_fields() {
        let msg = MessageBuilder::new(0x15).byte(0x07).build();
        assert_eq!(&msg[..], &[0x15, 0x07]);
    }

    #[test]
    fn test_build_with_sub_blocks() {
        let msg = MessageBuilder::new(0x00)
            .u16_be(0x014A)
            .sub_block_count()
            .sub_block(0x03, &[0xAA])
            .unwrap()
            .sub_block(0x09, &[])
            .unwrap()
            .build();

        assert_eq!(&msg[..], &[0x00, 0x01, 0x4A, 0x02, 0x03, 0x03, 0xAA, 0x09, 0x02]);
    }

    #[test]
    fn test_padded_sub_block() {
        let msg = MessageBuilder::new(0x00)
            .sub_block_count()
            .padded_sub_block(0x03, &[1, 2], 6)
            .unwrap()
            .build();

        assert_eq!(&msg[..], &[0x00, 0x01, 0x03, 0x06, 1, 2, 0, 0]);
    }

    #[test]
    fn test_padded_sub_block_too_small() {
        let result = MessageBuilder::new(0x00)
            .sub_block_count()
            .padded_sub_block(0x03, &[1, 2, 3], 4);
        assert!(result.is_err());
    }

    #[test]
    fn test_sub_block_without_count_rejected() {
        assert!(MessageBuilder::new(0x00).sub_block(0x03, &[]).is_err());
    }

    #[test]
    fn test_word_layout_tag() {
        let msg = MessageBuilder::with_layout(0x10, SubBlockLayout::Word)
            .sub_block_count()
            .sub_block(0x0148, &[0x01])
            .unwrap()
            .build();

        assert_eq!(&msg[..], &[0x10, 0x01, 0x01, 0x48, 0x04, 0x01]);
    }

    #[test]
    fn test_byte_layout_rejects_wide_tag() {
        let result = MessageBuilder::new(0x00)
            .sub_block_count()
            .sub_block(0x0148, &[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_too_short() {
        let result = Envelope::validate(&[0x16, 0x00], &status_shape());
        assert!(matches!(result, Err(IsiError::MalformedResponse(_))));

        let result = Envelope::validate(&[], &status_shape());
        assert!(matches!(result, Err(IsiError::MalformedResponse(_))));
    }

    #[test]
    fn test_validate_wrong_opcode() {
        let result = Envelope::validate(&[0x08, 0x00, 0x00], &status_shape());
        assert!(matches!(
            result,
            Err(IsiError::UnexpectedOpcode {
                expected: 0x16,
                actual: 0x08
            })
        ));
    }

    #[test]
    fn test_validate_status_not_ok() {
        let result = Envelope::validate(&[0x16, 0x03, 0x00], &status_shape());
        assert!(matches!(result, Err(IsiError::StatusNotOk(0x03))));
    }

    #[test]
    fn test_validate_operation() {
        let shape = ResponseShape {
            min_len: 3,
            opcode: 0x01,
            second: SecondByte::Operation(&[0x01, 0x02]),
            layout: SubBlockLayout::Byte,
        };

        assert!(Envelope::validate(&[0x01, 0x02, 0x00], &shape).is_ok());
        assert!(matches!(
            Envelope::validate(&[0x01, 0x05, 0x00], &shape),
            Err(IsiError::UnexpectedOpcode { actual: 0x05, .. })
        ));
    }

    #[test]
    fn test_envelope_sub_blocks() {
        let data = [0x16, 0x00, 0x01, 0x07, 0x03, 0x41];
        let envelope = Envelope::validate(&data, &status_shape()).unwrap();

        assert_eq!(envelope.opcode(), 0x16);
        let blocks: Vec<_> = envelope.sub_blocks(3).collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].as_ref().unwrap().tag(), 0x07);
    }
}
