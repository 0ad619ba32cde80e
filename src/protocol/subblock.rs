//! Sub-block iteration.
//!
//! A response carries its variable part as a run of tagged sub-blocks:
//! ```text
//! ... │ count │ tag │ len │ payload ... │ tag │ len │ payload ... │
//!       1 byte  1|2    1    len - header
//! ```
//! The count sits in the byte just before the first sub-block. The length
//! byte includes the header. The iterator yields borrowed [`SubBlock`]
//! views and never copies the buffer.
//!
//! # Example
//!
//! ```
//! use isi_client::protocol::{SubBlockIter, SubBlockLayout};
//!
//! // msg id, status, count = 1, then one 4-byte sub-block with tag 0x09
//! let msg = [0x01, 0x00, 0x01, 0x09, 0x04, 0xAA, 0xBB];
//! let mut iter = SubBlockIter::new(&msg, 3, SubBlockLayout::Byte);
//!
//! let sb = iter.next().unwrap().unwrap();
//! assert_eq!(sb.tag(), 0x09);
//! assert_eq!(sb.byte(2).unwrap(), 0xAA);
//! assert!(iter.next().is_none());
//! ```

use crate::error::{IsiError, Result};

use super::field;

/// Header shape of the sub-blocks in a message family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubBlockLayout {
    /// `[tag:1][len:1]`
    Byte,
    /// `[tag:2 BE][len:1]`
    Word,
}

impl SubBlockLayout {
    /// Size of the tag + length header.
    #[inline]
    pub fn header_size(self) -> usize {
        match self {
            SubBlockLayout::Byte => 2,
            SubBlockLayout::Word => 3,
        }
    }

    #[inline]
    fn len_offset(self) -> usize {
        self.header_size() - 1
    }
}

/// A single sub-block borrowed from a response buffer.
///
/// Offsets passed to the accessors are relative to the start of the
/// sub-block (the tag), the same way the message profiles document them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubBlock<'a> {
    tag: u16,
    data: &'a [u8],
}

impl<'a> SubBlock<'a> {
    /// Tag identifying the sub-block.
    #[inline]
    pub fn tag(&self) -> u16 {
        self.tag
    }

    /// Declared length, header included.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the sub-block is header-only.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Full sub-block bytes, header included.
    #[inline]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn byte(&self, pos: usize) -> Result<u8> {
        field::read_byte(self.data, pos)
    }

    pub fn u16_be(&self, pos: usize) -> Result<u16> {
        field::read_u16_be(self.data, pos)
    }

    /// Latin-1 text of `chars` characters at `pos`.
    pub fn latin_text(&self, chars: usize, pos: usize) -> Result<String> {
        field::read_fixed_text(self.data, pos, chars)
    }

    /// UCS-2BE text of `chars` characters at `pos`.
    pub fn wide_text(&self, chars: usize, pos: usize) -> Result<String> {
        field::read_fixed_wide_text(self.data, pos, chars)
    }
}

/// Lazy, forward-only walk over a sub-block region.
///
/// Yields `Ok(SubBlock)` for each well-formed entry. If a header does not
/// fit, a length is shorter than the header, or a length reaches past the
/// buffer, it yields a single `Err(MalformedResponse)` and then ends.
/// A count larger than what the buffer holds is therefore an error too,
/// not a silent end of data.
#[derive(Debug, Clone)]
pub struct SubBlockIter<'a> {
    buf: &'a [u8],
    offset: usize,
    remaining: u8,
    layout: SubBlockLayout,
    failed: bool,
}

impl<'a> SubBlockIter<'a> {
    /// Start iterating at `start`; the count is read from `buf[start - 1]`.
    ///
    /// The count is 0 only when the buffer ends before `start`. A buffer
    /// ending exactly at `start` with a non-zero count fails on the first
    /// step.
    pub fn new(buf: &'a [u8], start: usize, layout: SubBlockLayout) -> Self {
        let remaining = match start.checked_sub(1).and_then(|i| buf.get(i)) {
            Some(&count) => count,
            None => 0,
        };

        Self {
            buf,
            offset: start,
            remaining,
            layout,
            failed: false,
        }
    }

    /// Sub-blocks still announced by the count.
    #[inline]
    pub fn remaining(&self) -> u8 {
        self.remaining
    }

    /// Current offset into the buffer.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Whether the iterator hit a malformed entry.
    #[inline]
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    fn fail(&mut self, reason: String) -> Option<Result<SubBlock<'a>>> {
        self.failed = true;
        self.remaining = 0;
        Some(Err(IsiError::MalformedResponse(reason)))
    }

    fn read_tag(&self) -> Result<u16> {
        match self.layout {
            SubBlockLayout::Byte => field::read_byte(self.buf, self.offset).map(u16::from),
            SubBlockLayout::Word => field::read_u16_be(self.buf, self.offset),
        }
    }
}

impl<'a> Iterator for SubBlockIter<'a> {
    type Item = Result<SubBlock<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }

        let header = self.layout.header_size();
        if self.offset + header > self.buf.len() {
            return self.fail(format!(
                "sub-block header at offset {} exceeds buffer of {}",
                self.offset,
                self.buf.len()
            ));
        }

        let tag = match self.read_tag() {
            Ok(tag) => tag,
            Err(e) => return self.fail(e.to_string()),
        };
        let len = usize::from(self.buf[self.offset + self.layout.len_offset()]);

        if len < header {
            return self.fail(format!(
                "sub-block 0x{:02X} declares length {} below header size {}",
                tag, len, header
            ));
        }

        if self.offset + len > self.buf.len() {
            return self.fail(format!(
                "sub-block 0x{:02X} of length {} at offset {} exceeds buffer of {}",
                tag,
                len,
                self.offset,
                self.buf.len()
            ));
        }

        let data = &self.buf[self.offset..self.offset + len];
        self.offset += len;
        self.remaining -= 1;

        Some(Ok(SubBlock { tag, data }))
    }
}
