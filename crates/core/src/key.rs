//! Row keys
//!
//! A key is an opaque byte string whose length is fixed per data model.
//! Keys compare bytewise, which is also the order rows have in storage.
//! Generated keys are UUIDv4 bytes.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Default key length in bytes (one UUID)
pub const DEFAULT_KEY_SIZE: usize = 16;

/// Opaque fixed-length row key
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(Vec<u8>);

impl Key {
    /// Wrap raw key bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Key(bytes.into())
    }

    /// Generate a random 16 byte key
    pub fn generate() -> Self {
        Key(uuid::Uuid::new_v4().as_bytes().to_vec())
    }

    /// Raw bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key has no bytes
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse the base64 form produced by `Display`
    pub fn from_base64(encoded: &str) -> Option<Self> {
        URL_SAFE_NO_PAD.decode(encoded).ok().map(Key)
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(&self.0))
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Key({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_has_default_size() {
        let key = Key::generate();
        assert_eq!(key.len(), DEFAULT_KEY_SIZE);
        assert_ne!(key, Key::generate());
    }

    #[test]
    fn test_base64_roundtrip() {
        let key = Key::new(vec![0, 1, 2, 250, 251, 252]);
        let encoded = key.to_string();
        assert_eq!(Key::from_base64(&encoded), Some(key));
    }

    #[test]
    fn test_ordering_is_bytewise() {
        assert!(Key::new(vec![0, 9]) < Key::new(vec![1, 0]));
    }
}
