//! Approximate-membership filters over the 160-bit key space.
//!
//! Queries carry these to pre-filter entries by content key or payload
//! hash; digest responses carry them to summarize a matched key set.
//! False positives are allowed, false negatives are not.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use stash_core::{CanonicalDecode, CanonicalEncode, DecodeError, Key160};

/// A fixed-width bloom filter keyed by `Key160`.
///
/// Uses double hashing over the BLAKE3 digest of the key: the digest's
/// first two 64-bit words seed `index_i = h1 + i * h2 (mod m)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBloomFilter {
    /// Bit array, `(bit_count + 7) / 8` bytes
    bits: Vec<u8>,
    /// Number of bits
    bit_count: u32,
    /// Number of hash probes per key
    hash_count: u32,
}

impl KeyBloomFilter {
    /// Creates an empty filter with the given geometry.
    pub fn with_geometry(bit_count: u32, hash_count: u32) -> Self {
        let bit_count = bit_count.max(8);
        let hash_count = hash_count.clamp(1, 16);
        Self {
            bits: vec![0u8; (bit_count as usize + 7) / 8],
            bit_count,
            hash_count,
        }
    }

    /// Inserts a key.
    pub fn insert(&mut self, key: &Key160) {
        let probes: Vec<u32> = self.probes(key).collect();
        for index in probes {
            self.bits[(index / 8) as usize] |= 1 << (index % 8);
        }
    }

    /// Tests membership. May report false positives, never false
    /// negatives.
    pub fn contains(&self, key: &Key160) -> bool {
        self.probes(key)
            .all(|index| self.bits[(index / 8) as usize] & (1 << (index % 8)) != 0)
    }

    /// Number of bits in the filter.
    pub fn bit_count(&self) -> u32 {
        self.bit_count
    }

    fn probes(&self, key: &Key160) -> impl Iterator<Item = u32> {
        let digest = blake3::hash(key.as_bytes());
        let words = digest.as_bytes();
        let mut w1 = [0u8; 8];
        let mut w2 = [0u8; 8];
        w1.copy_from_slice(&words[0..8]);
        w2.copy_from_slice(&words[8..16]);
        let h1 = u64::from_le_bytes(w1);
        let h2 = u64::from_le_bytes(w2);
        let m = u64::from(self.bit_count);
        (0..u64::from(self.hash_count))
            .map(move |i| ((h1.wrapping_add(i.wrapping_mul(h2))) % m) as u32)
    }
}

impl CanonicalEncode for KeyBloomFilter {
    fn encode(&self, buf: &mut BytesMut) {
        self.bit_count.encode(buf);
        self.hash_count.encode(buf);
        self.bits.encode(buf);
    }
}

impl CanonicalDecode for KeyBloomFilter {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let bit_count = u32::decode(buf)?;
        let hash_count = u32::decode(buf)?;
        let bits = Vec::<u8>::decode(buf)?;
        if bits.len() != (bit_count as usize + 7) / 8 {
            return Err(DecodeError::Invalid(format!(
                "bloom bit array length {} does not match bit count {}",
                bits.len(),
                bit_count
            )));
        }
        if hash_count == 0 || hash_count > 16 {
            return Err(DecodeError::Invalid(format!(
                "bloom hash count {hash_count} out of range"
            )));
        }
        Ok(Self {
            bits,
            bit_count,
            hash_count,
        })
    }
}

/// Stateless factory producing filters sized for an expected entry count
/// and false-positive rate. Handed to the RPC layer at construction time
/// so digest responses use one consistent geometry.
#[derive(Debug, Clone, Copy)]
pub struct BloomFilterFactory {
    /// Expected number of inserted keys
    pub expected_entries: usize,
    /// Target false-positive probability
    pub false_positive_rate: f64,
}

impl Default for BloomFilterFactory {
    fn default() -> Self {
        Self {
            expected_entries: 1024,
            false_positive_rate: 0.01,
        }
    }
}

impl BloomFilterFactory {
    /// Creates a factory.
    pub fn new(expected_entries: usize, false_positive_rate: f64) -> Self {
        Self {
            expected_entries: expected_entries.max(1),
            false_positive_rate: false_positive_rate.clamp(1e-6, 0.5),
        }
    }

    /// Builds an empty filter with the optimal geometry for the
    /// configured load.
    pub fn create(&self) -> KeyBloomFilter {
        let n = self.expected_entries as f64;
        let ln2 = std::f64::consts::LN_2;
        let m = (-n * self.false_positive_rate.ln() / (ln2 * ln2)).ceil();
        let k = ((m / n) * ln2).round().max(1.0);
        KeyBloomFilter::with_geometry(m as u32, k as u32)
    }

    /// Builds a filter pre-populated with `keys`.
    pub fn create_from<'a>(&self, keys: impl IntoIterator<Item = &'a Key160>) -> KeyBloomFilter {
        let mut filter = self.create();
        for key in keys {
            filter.insert(key);
        }
        filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let factory = BloomFilterFactory::default();
        let keys: Vec<Key160> = (0..200).map(|_| Key160::random()).collect();
        let filter = factory.create_from(keys.iter());

        for key in &keys {
            assert!(filter.contains(key));
        }
    }

    #[test]
    fn test_calibration_rejects_most_unrelated_keys() {
        let factory = BloomFilterFactory::new(256, 0.01);
        let keys: Vec<Key160> = (0..256).map(|_| Key160::random()).collect();
        let filter = factory.create_from(keys.iter());

        let misses = (0..1000)
            .filter(|_| !filter.contains(&Key160::random()))
            .count();
        // With a 1% target rate, the vast majority of unrelated keys
        // must be rejected.
        assert!(misses > 900, "only {misses}/1000 unrelated keys rejected");
    }

    #[test]
    fn test_wire_roundtrip_preserves_membership() {
        let factory = BloomFilterFactory::new(64, 0.05);
        let key = Key160::random();
        let mut filter = factory.create();
        filter.insert(&key);

        let decoded = KeyBloomFilter::from_bytes(&filter.to_vec()).unwrap();
        assert_eq!(filter, decoded);
        assert!(decoded.contains(&key));
    }

    #[test]
    fn test_geometry_mismatch_rejected() {
        let filter = KeyBloomFilter::with_geometry(64, 3);
        let mut bytes = filter.to_vec();
        // Corrupt the declared bit count.
        bytes[0] = 0xFF;
        assert!(KeyBloomFilter::from_bytes(&bytes).is_err());
    }
}
