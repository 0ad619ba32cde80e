//! Primitive wire fields.
//!
//! Every reader takes the whole buffer plus an offset and checks the
//! bounds before touching a byte. Multi-byte integers are Big Endian.
//!
//! Two text forms appear on the wire:
//! - latin-1, one byte per character (device info strings)
//! - UCS-2BE, two bytes per character, zero-padded (passwords)
//!
//! # Example
//!
//! ```
//! use isi_client::protocol::field;
//!
//! let field = field::encode_fixed_wide_text("1234", 8).unwrap();
//! assert_eq!(field, vec![0, b'1', 0, b'2', 0, b'3', 0, b'4']);
//! assert_eq!(field::read_fixed_wide_text(&field, 0, 4).unwrap(), "1234");
//! ```

use crate::error::{IsiError, Result};

#[inline]
fn check(buf: &[u8], offset: usize, len: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= buf.len() => Ok(()),
        _ => Err(IsiError::OutOfBounds {
            offset,
            len,
            available: buf.len(),
        }),
    }
}

/// Read one byte.
#[inline]
pub fn read_byte(buf: &[u8], offset: usize) -> Result<u8> {
    check(buf, offset, 1)?;
    Ok(buf[offset])
}

/// Read a Big Endian u16.
#[inline]
pub fn read_u16_be(buf: &[u8], offset: usize) -> Result<u16> {
    check(buf, offset, 2)?;
    Ok(u16::from_be_bytes([buf[offset], buf[offset + 1]]))
}

/// Encode a u16 as two Big Endian bytes.
#[inline]
pub fn write_u16_be(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

/// Read `declared_len` latin-1 characters starting at `offset`.
///
/// Exactly `declared_len` bytes are consumed. Trailing NUL padding inside
/// that extent is dropped; an embedded NUL before other text is kept.
pub fn read_fixed_text(buf: &[u8], offset: usize, declared_len: usize) -> Result<String> {
    check(buf, offset, declared_len)?;
    let raw = &buf[offset..offset + declared_len];
    let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    Ok(raw[..end].iter().map(|&b| char::from(b)).collect())
}

/// Encode `text` as UCS-2BE into a zero-padded field of `width_bytes`.
///
/// Fails with `InvalidInput` when the text needs more than `width_bytes`
/// or contains a character outside the Basic Multilingual Plane.
pub fn encode_fixed_wide_text(text: &str, width_bytes: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; width_bytes];
    let mut pos = 0;

    for c in text.chars() {
        let unit = u16::try_from(u32::from(c))
            .map_err(|_| IsiError::invalid(format!("character {:?} not representable in UCS-2", c)))?;
        if pos + 2 > width_bytes {
            return Err(IsiError::invalid(format!(
                "text of {} characters does not fit in {} bytes",
                text.chars().count(),
                width_bytes
            )));
        }
        out[pos..pos + 2].copy_from_slice(&write_u16_be(unit));
        pos += 2;
    }

    Ok(out)
}

/// Read `chars` UCS-2BE characters starting at `offset`.
///
/// Trailing zero code units inside the extent are padding and dropped.
pub fn read_fixed_wide_text(buf: &[u8], offset: usize, chars: usize) -> Result<String> {
    let width = chars
        .checked_mul(2)
        .ok_or_else(|| IsiError::malformed("wide text length overflow"))?;
    check(buf, offset, width)?;

    let units: Vec<u16> = buf[offset..offset + width]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    let end = units.iter().rposition(|&u| u != 0).map_or(0, |i| i + 1);

    char::decode_utf16(units[..end].iter().copied())
        .collect::<std::result::Result<String, _>>()
        .map_err(|e| IsiError::malformed(format!("invalid UCS-2 text: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_byte_bounds() {
        let buf = [0x10, 0x20];
        assert_eq!(read_byte(&buf, 1).unwrap(), 0x20);
        assert!(matches!(
            read_byte(&buf, 2),
            Err(IsiError::OutOfBounds {
                offset: 2,
                len: 1,
                available: 2
            })
        ));
    }

    #[test]
    fn test_read_u16_big_endian() {
        let buf = [0x01, 0x4A, 0xFF];
        assert_eq!(read_u16_be(&buf, 0).unwrap(), 0x014A);
        assert!(read_u16_be(&buf, 2).is_err());
    }

    #[test]
    fn test_read_u16_offset_overflow() {
        let buf = [0u8; 4];
        assert!(read_u16_be(&buf, usize::MAX).is_err());
    }

    #[test]
    fn test_write_u16_big_endian() {
        assert_eq!(write_u16_be(330), [0x01, 0x4A]);
        assert_eq!(write_u16_be(33), [0x00, 0x21]);
    }

    #[test]
    fn test_read_fixed_text_trims_padding() {
        let buf = [0xAA, b'N', b'o', b'k', b'i', b'a', 0, 0];
        assert_eq!(read_fixed_text(&buf, 1, 7).unwrap(), "Nokia");
    }

    #[test]
    fn test_read_fixed_text_respects_declared_length() {
        // Declared length stops before the rest of the buffer.
        let buf = *b"RM-596xyz";
        assert_eq!(read_fixed_text(&buf, 0, 6).unwrap(), "RM-596");
        assert!(read_fixed_text(&buf, 4, 6).is_err());
    }

    #[test]
    fn test_read_fixed_text_latin1() {
        let buf = [0xC5, b'l', b'a', b'n', b'd'];
        assert_eq!(read_fixed_text(&buf, 0, 5).unwrap(), "Åland");
    }

    #[test]
    fn test_read_fixed_text_keeps_embedded_nul() {
        let buf = [b'a', 0, b'b', 0];
        assert_eq!(read_fixed_text(&buf, 0, 4).unwrap(), "a\0b");
    }

    #[test]
    fn test_encode_wide_text_padding() {
        let field = encode_fixed_wide_text("12", 8).unwrap();
        assert_eq!(field, vec![0, b'1', 0, b'2', 0, 0, 0, 0]);

        let empty = encode_fixed_wide_text("", 8).unwrap();
        assert_eq!(empty, vec![0; 8]);
    }

    #[test]
    fn test_encode_wide_text_too_long() {
        let result = encode_fixed_wide_text("12345", 8);
        assert!(matches!(result, Err(IsiError::InvalidInput(_))));
    }

    #[test]
    fn test_encode_wide_text_outside_bmp() {
        assert!(encode_fixed_wide_text("\u{1F600}", 8).is_err());
    }

    #[test]
    fn test_read_wide_text() {
        let buf = [0, b'4', 0, b'2', 0, 0, 0, 0];
        assert_eq!(read_fixed_wide_text(&buf, 0, 4).unwrap(), "42");
        assert!(read_fixed_wide_text(&buf, 2, 4).is_err());
    }
}
