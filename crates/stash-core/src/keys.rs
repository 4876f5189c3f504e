//! The composite key space.
//!
//! Every stored entry is addressed by a `Key640`, a four-component composite
//! of 160-bit keys ordered lexicographically:
//!
//! ```text
//! Key640 = (location, domain, content, version)
//! ```
//!
//! `Key320` names the `(location, domain)` bucket a key lives in, and
//! `Key480` drops the version component; it is the unit a peer acknowledges
//! when it confirms a store operation.

use std::fmt;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::crypto::hash160;
use crate::encoding::{CanonicalDecode, CanonicalEncode, DecodeError};
use crate::KEY160_BYTES;

/// A 160-bit identifier, ordered by its big-endian integer value.
///
/// Used as location key, domain key, content key, version key, and peer id.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Key160(pub [u8; KEY160_BYTES]);

impl Key160 {
    /// The all-zero key.
    pub const ZERO: Key160 = Key160([0u8; KEY160_BYTES]);

    /// The all-ones key, the maximum of the key space.
    pub const MAX: Key160 = Key160([0xFF; KEY160_BYTES]);

    /// Creates a key from its raw bytes.
    pub const fn new(bytes: [u8; KEY160_BYTES]) -> Self {
        Self(bytes)
    }

    /// Hashes arbitrary bytes into the key space.
    pub fn hash_of(data: &[u8]) -> Self {
        Self(hash160(data))
    }

    /// Draws a uniformly random key from a cryptographically secure source.
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; KEY160_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; KEY160_BYTES] {
        &self.0
    }

    /// Parses a key from a hex string. Short strings are padded on the
    /// left with zeros, so `"0x01"`-style abbreviations address the same
    /// key as their fully padded form.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let padded = if s.len() % 2 == 1 {
            format!("0{s}")
        } else {
            s.to_string()
        };
        let digits = hex::decode(&padded)?;
        if digits.len() > KEY160_BYTES {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut bytes = [0u8; KEY160_BYTES];
        bytes[KEY160_BYTES - digits.len()..].copy_from_slice(&digits);
        Ok(Self(bytes))
    }

    /// Returns the full hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Key160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key160({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for Key160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..12])
    }
}

impl From<[u8; KEY160_BYTES]> for Key160 {
    fn from(bytes: [u8; KEY160_BYTES]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Key160 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl CanonicalEncode for Key160 {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
    }
}

impl CanonicalDecode for Key160 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self(<[u8; KEY160_BYTES]>::decode(buf)?))
    }
}

/// A `(location, domain)` pair naming a storage bucket.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Key320 {
    /// Location component
    pub location: Key160,
    /// Domain component
    pub domain: Key160,
}

impl Key320 {
    /// Creates a bucket key.
    pub const fn new(location: Key160, domain: Key160) -> Self {
        Self { location, domain }
    }

    /// The smallest `Key640` inside this bucket.
    pub const fn min_key(&self) -> Key640 {
        Key640::new(self.location, self.domain, Key160::ZERO, Key160::ZERO)
    }

    /// The largest `Key640` inside this bucket.
    pub const fn max_key(&self) -> Key640 {
        Key640::new(self.location, self.domain, Key160::MAX, Key160::MAX)
    }
}

impl fmt::Display for Key320 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.location, self.domain)
    }
}

impl CanonicalEncode for Key320 {
    fn encode(&self, buf: &mut BytesMut) {
        self.location.encode(buf);
        self.domain.encode(buf);
    }
}

impl CanonicalDecode for Key320 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            location: Key160::decode(buf)?,
            domain: Key160::decode(buf)?,
        })
    }
}

/// A `(location, domain, content)` triple; the version-free form of a key
/// that peers report back when acknowledging stored entries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Key480 {
    /// Location component
    pub location: Key160,
    /// Domain component
    pub domain: Key160,
    /// Content component
    pub content: Key160,
}

impl Key480 {
    /// Creates a version-free key.
    pub const fn new(location: Key160, domain: Key160, content: Key160) -> Self {
        Self {
            location,
            domain,
            content,
        }
    }
}

impl fmt::Display for Key480 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.location, self.domain, self.content)
    }
}

impl CanonicalEncode for Key480 {
    fn encode(&self, buf: &mut BytesMut) {
        self.location.encode(buf);
        self.domain.encode(buf);
        self.content.encode(buf);
    }
}

impl CanonicalDecode for Key480 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            location: Key160::decode(buf)?,
            domain: Key160::decode(buf)?,
            content: Key160::decode(buf)?,
        })
    }
}

/// The primary key of every stored entry.
///
/// Ordering is lexicographic over `(location, domain, content, version)`,
/// which the derived `Ord` gives us from field order. Range scans over a
/// bucket rely on this.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Key640 {
    /// Location component
    pub location: Key160,
    /// Domain component
    pub domain: Key160,
    /// Content component
    pub content: Key160,
    /// Version component
    pub version: Key160,
}

impl Key640 {
    /// Creates a full entry key.
    pub const fn new(location: Key160, domain: Key160, content: Key160, version: Key160) -> Self {
        Self {
            location,
            domain,
            content,
            version,
        }
    }

    /// The bucket this key belongs to.
    pub const fn bucket(&self) -> Key320 {
        Key320::new(self.location, self.domain)
    }

    /// Drops the version component.
    pub const fn key480(&self) -> Key480 {
        Key480::new(self.location, self.domain, self.content)
    }

    /// Returns a copy with the content component swapped out.
    pub const fn with_content(&self, content: Key160) -> Self {
        Self {
            location: self.location,
            domain: self.domain,
            content,
            version: self.version,
        }
    }
}

impl fmt::Display for Key640 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.location, self.domain, self.content, self.version
        )
    }
}

impl CanonicalEncode for Key640 {
    fn encode(&self, buf: &mut BytesMut) {
        self.location.encode(buf);
        self.domain.encode(buf);
        self.content.encode(buf);
        self.version.encode(buf);
    }
}

impl CanonicalDecode for Key640 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            location: Key160::decode(buf)?,
            domain: Key160::decode(buf)?,
            content: Key160::decode(buf)?,
            version: Key160::decode(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(b: u8) -> Key160 {
        let mut bytes = [0u8; KEY160_BYTES];
        bytes[KEY160_BYTES - 1] = b;
        Key160::new(bytes)
    }

    #[test]
    fn test_key160_order_is_big_endian_value() {
        assert!(k(1) < k(2));
        assert!(Key160::ZERO < k(1));
        assert!(k(0xFF) < Key160::MAX);

        let mut high = [0u8; KEY160_BYTES];
        high[0] = 1;
        assert!(k(0xFF) < Key160::new(high));
    }

    #[test]
    fn test_key640_lexicographic_order() {
        let a = Key640::new(k(1), k(1), k(1), k(2));
        let b = Key640::new(k(1), k(1), k(2), k(1));
        let c = Key640::new(k(1), k(2), k(0), k(0));
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_bucket_bounds_cover_bucket() {
        let bucket = Key320::new(k(9), k(7));
        let inside = Key640::new(k(9), k(7), k(200), Key160::MAX);
        assert!(bucket.min_key() <= inside);
        assert!(inside <= bucket.max_key());

        let outside = Key640::new(k(9), k(8), Key160::ZERO, Key160::ZERO);
        assert!(outside > bucket.max_key());
    }

    #[test]
    fn test_hex_abbreviation_pads_left() {
        let key = Key160::from_hex("0x01").unwrap();
        assert_eq!(key, k(1));
        assert_eq!(Key160::from_hex(&key.to_hex()).unwrap(), key);
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(Key160::hash_of(b"payload"), Key160::hash_of(b"payload"));
        assert_ne!(Key160::hash_of(b"payload"), Key160::hash_of(b"payloae"));
    }

    #[test]
    fn test_key640_roundtrip() {
        let key = Key640::new(Key160::random(), k(3), Key160::random(), Key160::ZERO);
        let decoded = Key640::from_bytes(&key.to_vec()).unwrap();
        assert_eq!(key, decoded);
    }
}
