//! Digest summaries of a matched key set.

use stash_core::{Key160, Key640};
use stash_proto::{BloomFilterFactory, KeyBloomFilter, KeyMap640};

/// The summary a digest query produces: each matched key paired with the
/// 160-bit hash of its payload, in scan order.
///
/// The bloom projections summarize one key component each; responses use
/// the content and version projections always, and the location and
/// domain projections only for scans that were not pinned to a bucket.
#[derive(Debug, Clone, Default)]
pub struct DigestInfo {
    digests: Vec<(Key640, Key160)>,
}

impl DigestInfo {
    /// Creates an empty digest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a matched key with its payload hash.
    pub fn put(&mut self, key: Key640, digest: Key160) {
        self.digests.push((key, digest));
    }

    /// Number of matched keys.
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    /// Whether nothing matched.
    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// Iterates `(key, digest)` pairs in scan order.
    pub fn iter(&self) -> impl Iterator<Item = &(Key640, Key160)> {
        self.digests.iter()
    }

    /// Converts into the wire map for non-bloom responses.
    pub fn to_key_map(&self) -> KeyMap640 {
        let mut map = KeyMap640::new();
        for (key, digest) in &self.digests {
            map.put(*key, *digest);
        }
        map
    }

    /// Bloom filter over the location components of the matched keys.
    pub fn location_key_filter(&self, factory: &BloomFilterFactory) -> KeyBloomFilter {
        factory.create_from(self.digests.iter().map(|(k, _)| &k.location))
    }

    /// Bloom filter over the domain components of the matched keys.
    pub fn domain_key_filter(&self, factory: &BloomFilterFactory) -> KeyBloomFilter {
        factory.create_from(self.digests.iter().map(|(k, _)| &k.domain))
    }

    /// Bloom filter over the content components of the matched keys.
    pub fn content_key_filter(&self, factory: &BloomFilterFactory) -> KeyBloomFilter {
        factory.create_from(self.digests.iter().map(|(k, _)| &k.content))
    }

    /// Bloom filter over the version components of the matched keys.
    pub fn version_key_filter(&self, factory: &BloomFilterFactory) -> KeyBloomFilter {
        factory.create_from(self.digests.iter().map(|(k, _)| &k.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(b: u8) -> Key160 {
        let mut bytes = [0u8; 20];
        bytes[19] = b;
        Key160::new(bytes)
    }

    #[test]
    fn test_key_map_preserves_scan_order() {
        let mut info = DigestInfo::new();
        info.put(Key640::new(k(1), k(2), k(9), Key160::ZERO), k(0xA));
        info.put(Key640::new(k(1), k(2), k(3), Key160::ZERO), k(0xB));

        let map = info.to_key_map();
        let contents: Vec<_> = map.iter().map(|(key, _)| key.content).collect();
        assert_eq!(contents, vec![k(9), k(3)]);
    }

    #[test]
    fn test_component_filters_cover_matched_keys() {
        let factory = BloomFilterFactory::default();
        let mut info = DigestInfo::new();
        for content in [k(1), k(2), k(3)] {
            info.put(Key640::new(k(7), k(8), content, k(4)), k(0));
        }

        let content_filter = info.content_key_filter(&factory);
        for content in [k(1), k(2), k(3)] {
            assert!(content_filter.contains(&content));
        }

        let version_filter = info.version_key_filter(&factory);
        assert!(version_filter.contains(&k(4)));

        let location_filter = info.location_key_filter(&factory);
        assert!(location_filter.contains(&k(7)));
    }
}
