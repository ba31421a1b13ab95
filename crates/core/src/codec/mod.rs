//! Byte codecs
//!
//! Every encoder is written once against the `ByteSink` trait and run twice:
//! first into a `LengthCounter` to size the output, then into a
//! `SliceWriter` over an exactly-sized buffer. Readers are the symmetric
//! inverse and take the schema as input since the bytes are not
//! self-describing.
//!
//! - `scalar`: single-value payloads
//! - `cell`: type indicator plus payload stored in a table cell
//! - `qualifier`: property references to sortable qualifier bytes and back

pub mod cell;
pub mod qualifier;
pub mod scalar;

pub use cell::{split_version, CellValue, TypeIndicator};
pub use qualifier::{
    decode_qualifier, encode_qualifier, qualifier_len, qualifier_parts, write_qualifier,
    DecodedQualifier, QualifierPart, LAST_VERSION_QUALIFIER, SOFT_DELETE_QUALIFIER,
};
pub use scalar::{read_scalar, scalar_bytes, scalar_len, write_scalar};

use crate::error::{Error, Result};
use crate::varint::{varint_len, write_varint};

/// Width of the suffix a wildcard segment skips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WildcardWidth {
    /// Fixed number of bytes (list item index)
    Fixed(usize),
    /// Varint length followed by that many bytes (set item, map key)
    LengthPrefixed,
}

/// Destination of an encoder traversal
pub trait ByteSink {
    /// Append raw bytes
    fn put(&mut self, bytes: &[u8]);

    /// Append a varint
    fn put_varint(&mut self, value: u64);

    /// Append one byte
    fn put_u8(&mut self, byte: u8) {
        self.put(&[byte]);
    }

    /// Record a wildcard position
    ///
    /// Only sinks that build fuzzy matchers accept wildcards.
    fn wildcard(&mut self, _width: WildcardWidth) -> Result<()> {
        Err(Error::InvalidReference(
            "wildcard reference has no concrete qualifier".into(),
        ))
    }
}

/// Sink that only counts bytes
#[derive(Debug, Default)]
pub struct LengthCounter {
    len: usize,
}

impl LengthCounter {
    /// Bytes counted so far
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing was counted
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl ByteSink for LengthCounter {
    fn put(&mut self, bytes: &[u8]) {
        self.len += bytes.len();
    }

    fn put_varint(&mut self, value: u64) {
        self.len += varint_len(value);
    }
}

/// Sink writing into a pre-sized buffer
///
/// The buffer must be exactly as long as the `LengthCounter` pass reported;
/// `finish` verifies it was filled completely.
#[derive(Debug)]
pub struct SliceWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SliceWriter<'a> {
    /// Writer at the start of `buf`
    pub fn new(buf: &'a mut [u8]) -> Self {
        SliceWriter { buf, pos: 0 }
    }

    /// Bytes written so far
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Check the buffer was filled exactly
    pub fn finish(self) -> Result<usize> {
        if self.pos != self.buf.len() {
            return Err(Error::Corruption(format!(
                "encoder wrote {} of {} bytes",
                self.pos,
                self.buf.len()
            )));
        }
        Ok(self.pos)
    }
}

impl ByteSink for SliceWriter<'_> {
    fn put(&mut self, bytes: &[u8]) {
        let end = self.pos + bytes.len();
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
    }

    fn put_varint(&mut self, value: u64) {
        self.pos += write_varint(&mut self.buf[self.pos..], value);
    }
}

/// Run `encode` through both phases and return the exact bytes
pub fn encode_exact<F>(encode: F) -> Result<Vec<u8>>
where
    F: Fn(&mut dyn ByteSink) -> Result<()>,
{
    let mut counter = LengthCounter::default();
    encode(&mut counter)?;
    let mut buf = vec![0u8; counter.len()];
    let mut writer = SliceWriter::new(&mut buf);
    encode(&mut writer)?;
    writer.finish()?;
    Ok(buf)
}

/// Split `n` bytes off the front of `bytes` at `pos`, advancing `pos`
pub(crate) fn take<'b>(bytes: &'b [u8], pos: &mut usize, n: usize) -> Result<&'b [u8]> {
    let end = pos
        .checked_add(n)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| {
            Error::Decode(format!(
                "need {n} bytes at offset {}, only {} available",
                pos,
                bytes.len().saturating_sub(*pos)
            ))
        })?;
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}
