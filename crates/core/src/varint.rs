//! Self-delimiting variable length integers
//!
//! Big-endian 7-bit groups: every byte except the last carries the
//! continuation bit. A ninth byte, when present, carries a full 8 bits so
//! any `u64` fits in at most 9 bytes.
//!
//! The encoding is prefix-free, which the qualifier codec relies on: no
//! encoded varint is a prefix of a different encoded varint.

use crate::error::{Error, Result};

/// Maximum number of bytes a varint occupies
pub const MAX_VARINT_LEN: usize = 9;

/// Number of bytes needed to encode `value`
pub const fn varint_len(value: u64) -> usize {
    if value <= 0x7F {
        1
    } else if value <= 0x3FFF {
        2
    } else if value <= 0x001F_FFFF {
        3
    } else if value <= 0x0FFF_FFFF {
        4
    } else if value <= 0x07_FFFF_FFFF {
        5
    } else if value <= 0x03FF_FFFF_FFFF {
        6
    } else if value <= 0x01_FFFF_FFFF_FFFF {
        7
    } else if value <= 0xFF_FFFF_FFFF_FFFF {
        8
    } else {
        9
    }
}

/// Write `value` into the front of `buf`, returning the number of bytes written.
///
/// `buf` must hold at least `varint_len(value)` bytes.
#[allow(clippy::cast_possible_truncation)]
pub fn write_varint(buf: &mut [u8], value: u64) -> usize {
    let len = varint_len(value);

    if len == 1 {
        buf[0] = value as u8;
    } else if len == 9 {
        let mut v = value >> 8;
        for i in (0..8).rev() {
            buf[i] = (v as u8 & 0x7F) | 0x80;
            v >>= 7;
        }
        buf[8] = value as u8;
    } else {
        let mut v = value;
        for i in (0..len).rev() {
            if i == len - 1 {
                buf[i] = v as u8 & 0x7F;
            } else {
                buf[i] = (v as u8 & 0x7F) | 0x80;
            }
            v >>= 7;
        }
    }

    len
}

/// Append `value` to `out`
pub fn push_varint(out: &mut Vec<u8>, value: u64) {
    let mut scratch = [0u8; MAX_VARINT_LEN];
    let len = write_varint(&mut scratch, value);
    out.extend_from_slice(&scratch[..len]);
}

/// Read a varint from the front of `buf`, returning `(value, bytes_consumed)`.
pub fn read_varint(buf: &[u8]) -> Result<(u64, usize)> {
    if buf.is_empty() {
        return Err(Error::Decode("unexpected end of input reading varint".into()));
    }

    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate().take(8) {
        if byte & 0x80 == 0 {
            value = (value << 7) | u64::from(byte);
            return Ok((value, i + 1));
        }
        value = (value << 7) | u64::from(byte & 0x7F);
    }

    if buf.len() > 8 {
        value = (value << 8) | u64::from(buf[8]);
        Ok((value, 9))
    } else {
        Err(Error::Decode("truncated varint".into()))
    }
}
