//! Version identifier type
//!
//! Every mutation produces a version. A version is a hybrid logical clock
//! reading: 48 bits of wall-clock milliseconds and a 16 bit counter that
//! disambiguates mutations within the same millisecond, packed into one
//! `u64` so that numeric order equals causal order.
//!
//! ## Byte forms
//!
//! - Plain: 8 bytes big-endian, sorts oldest first.
//! - Inverted: every bit flipped, sorts newest first. Historic tables append
//!   the inverted form to their keys so a forward scan visits the most recent
//!   version of a qualifier first.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Number of bytes in an encoded version
pub const VERSION_BYTE_SIZE: usize = 8;

const COUNTER_BITS: u32 = 16;
const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;

/// Monotonic (timestamp, counter) version
///
/// ## Invariants
///
/// - Versions are totally ordered by their packed `u64`
/// - The zero version is never assigned to a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The version before any mutation
    pub const ZERO: Version = Version(0);

    /// Highest representable version
    pub const MAX: Version = Version(u64::MAX);

    /// Create from wall-clock milliseconds and a counter
    pub const fn new(timestamp_millis: u64, counter: u16) -> Self {
        Version((timestamp_millis << COUNTER_BITS) | counter as u64)
    }

    /// Create from the packed representation
    pub const fn from_u64(raw: u64) -> Self {
        Version(raw)
    }

    /// Packed representation
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Wall-clock milliseconds part
    #[inline]
    pub const fn timestamp_millis(&self) -> u64 {
        self.0 >> COUNTER_BITS
    }

    /// Counter part
    #[inline]
    pub const fn counter(&self) -> u16 {
        (self.0 & COUNTER_MASK) as u16
    }

    /// The next version in packed order
    pub const fn increment(&self) -> Self {
        Version(self.0.saturating_add(1))
    }

    /// Big-endian bytes, oldest first ordering
    #[inline]
    pub fn to_bytes(&self) -> [u8; VERSION_BYTE_SIZE] {
        self.0.to_be_bytes()
    }

    /// Bit-inverted big-endian bytes, newest first ordering
    #[inline]
    pub fn to_inverted_bytes(&self) -> [u8; VERSION_BYTE_SIZE] {
        (!self.0).to_be_bytes()
    }

    /// Decode from the front of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Version(u64::from_be_bytes(take_eight(bytes)?)))
    }

    /// Decode the inverted form from the front of `bytes`
    pub fn from_inverted_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Version(!u64::from_be_bytes(take_eight(bytes)?)))
    }
}

fn take_eight(bytes: &[u8]) -> Result<[u8; VERSION_BYTE_SIZE]> {
    bytes
        .get(..VERSION_BYTE_SIZE)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| {
            Error::Decode(format!(
                "version needs {} bytes, got {}",
                VERSION_BYTE_SIZE,
                bytes.len()
            ))
        })
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}", self.timestamp_millis(), self.counter())
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::ZERO
    }
}
