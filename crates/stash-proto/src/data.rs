//! Value containers carried in message slots.
//!
//! All map-like containers here are Vec-backed: iteration order is
//! insertion order and survives the wire unchanged. Handlers depend on
//! that to report per-entry status bytes in the order the entries
//! arrived.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use stash_core::{
    CanonicalDecode, CanonicalEncode, DecodeError, Key160, Key640, PublicKey,
};

/// A stored value: opaque payload plus the metadata the storage layer
/// tracks for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    /// Opaque payload bytes
    payload: Bytes,
    /// Seconds until expiry; 0 means the entry does not expire
    ttl_secs: u32,
    /// Request entry-level protection for this value
    protect_entry: bool,
    /// Protection owner, recorded by the store on a protected write
    public_key: Option<PublicKey>,
}

impl Data {
    /// Creates a value from payload bytes.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ttl_secs: 0,
            protect_entry: false,
            public_key: None,
        }
    }

    /// Sets the time-to-live in seconds.
    pub fn with_ttl(mut self, ttl_secs: u32) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// Flags this value for entry-level protection.
    pub fn protected(mut self) -> Self {
        self.protect_entry = true;
        self
    }

    /// The payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The time-to-live in seconds (0 = never expires).
    pub fn ttl_secs(&self) -> u32 {
        self.ttl_secs
    }

    /// Whether entry-level protection was requested.
    pub fn protect_entry(&self) -> bool {
        self.protect_entry
    }

    /// The recorded protection owner, if any.
    pub fn public_key(&self) -> Option<&PublicKey> {
        self.public_key.as_ref()
    }

    /// Records the protection owner. The storage layer calls this when a
    /// signed write claims the entry or its domain.
    pub fn set_public_key(&mut self, key: Option<PublicKey>) {
        self.public_key = key;
    }

    /// Deterministic 160-bit hash of the payload.
    pub fn hash(&self) -> Key160 {
        Key160::hash_of(&self.payload)
    }
}

impl CanonicalEncode for Data {
    fn encode(&self, buf: &mut BytesMut) {
        self.payload.encode(buf);
        self.ttl_secs.encode(buf);
        self.protect_entry.encode(buf);
        self.public_key.encode(buf);
    }
}

impl CanonicalDecode for Data {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let payload = Bytes::decode(buf)?;
        if payload.len() > crate::MAX_PAYLOAD_BYTES {
            return Err(DecodeError::LengthOverflow(payload.len()));
        }
        Ok(Self {
            payload,
            ttl_secs: u32::decode(buf)?,
            protect_entry: bool::decode(buf)?,
            public_key: Option::<PublicKey>::decode(buf)?,
        })
    }
}

/// An ordered `Key640 → Data` mapping.
///
/// Inserting an existing key replaces the value in place, keeping the
/// key's original position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMap {
    entries: Vec<(Key640, Data)>,
}

impl DataMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map from `(content key → data)` pairs that all share one
    /// location, domain, and version.
    pub fn from_content(
        location: Key160,
        domain: Key160,
        version: Key160,
        content: impl IntoIterator<Item = (Key160, Data)>,
    ) -> Self {
        let mut map = Self::new();
        for (content_key, data) in content {
            map.insert(Key640::new(location, domain, content_key, version), data);
        }
        map
    }

    /// Inserts or replaces a value.
    pub fn insert(&mut self, key: Key640, data: Data) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = data,
            None => self.entries.push((key, data)),
        }
    }

    /// Looks up a value.
    pub fn get(&self, key: &Key640) -> Option<&Data> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, d)| d)
    }

    /// Whether the key is present.
    pub fn contains_key(&self, key: &Key640) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(Key640, Data)> {
        self.entries.iter()
    }

    /// The keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &Key640> {
        self.entries.iter().map(|(k, _)| k)
    }
}

impl IntoIterator for DataMap {
    type Item = (Key640, Data);
    type IntoIter = std::vec::IntoIter<(Key640, Data)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(Key640, Data)> for DataMap {
    fn from_iter<I: IntoIterator<Item = (Key640, Data)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, data) in iter {
            map.insert(key, data);
        }
        map
    }
}

impl CanonicalEncode for DataMap {
    fn encode(&self, buf: &mut BytesMut) {
        (self.entries.len() as u32).encode(buf);
        for (key, data) in &self.entries {
            key.encode(buf);
            data.encode(buf);
        }
    }
}

impl CanonicalDecode for DataMap {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let len = u32::decode(buf)? as usize;
        if len > crate::MAX_DATA_MAP_ENTRIES {
            return Err(DecodeError::LengthOverflow(len));
        }
        let mut entries = Vec::with_capacity(len);
        for _ in 0..len {
            let key = Key640::decode(buf)?;
            let data = Data::decode(buf)?;
            entries.push((key, data));
        }
        Ok(Self { entries })
    }
}

/// An ordered sequence of `Key640`, duplicates allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCollection {
    keys: Vec<Key640>,
}

impl KeyCollection {
    /// Creates a collection from a key sequence.
    pub fn new(keys: impl IntoIterator<Item = Key640>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// Builds a collection from content keys that share one location,
    /// domain, and version.
    pub fn from_content(
        location: Key160,
        domain: Key160,
        version: Key160,
        content_keys: impl IntoIterator<Item = Key160>,
    ) -> Self {
        Self {
            keys: content_keys
                .into_iter()
                .map(|c| Key640::new(location, domain, c, version))
                .collect(),
        }
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The keys in order.
    pub fn keys(&self) -> &[Key640] {
        &self.keys
    }

    /// Iterates the keys in order.
    pub fn iter(&self) -> impl Iterator<Item = &Key640> {
        self.keys.iter()
    }
}

impl CanonicalEncode for KeyCollection {
    fn encode(&self, buf: &mut BytesMut) {
        self.keys.encode(buf);
    }
}

impl CanonicalDecode for KeyCollection {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            keys: Vec::<Key640>::decode(buf)?,
        })
    }
}

/// An ordered `Key640 → byte` mapping; carries per-entry status ordinals
/// in PUT/ADD responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMapByte {
    entries: Vec<(Key640, u8)>,
}

impl KeyMapByte {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a status byte for a key.
    pub fn put(&mut self, key: Key640, status: u8) {
        self.entries.push((key, status));
    }

    /// Looks up the status byte for a key.
    pub fn get(&self, key: &Key640) -> Option<u8> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, b)| *b)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(Key640, u8)> {
        self.entries.iter()
    }

    /// True when every status byte equals `expected`.
    pub fn all_equal(&self, expected: u8) -> bool {
        self.entries.iter().all(|(_, b)| *b == expected)
    }
}

impl CanonicalEncode for KeyMapByte {
    fn encode(&self, buf: &mut BytesMut) {
        (self.entries.len() as u32).encode(buf);
        for (key, status) in &self.entries {
            key.encode(buf);
            status.encode(buf);
        }
    }
}

impl CanonicalDecode for KeyMapByte {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let len = u32::decode(buf)? as usize;
        if len > crate::MAX_DATA_MAP_ENTRIES {
            return Err(DecodeError::LengthOverflow(len));
        }
        let mut entries = Vec::with_capacity(len);
        for _ in 0..len {
            let key = Key640::decode(buf)?;
            let status = u8::decode(buf)?;
            entries.push((key, status));
        }
        Ok(Self { entries })
    }
}

/// An ordered `Key640 → Key160` mapping; carries per-entry digests in
/// DIGEST responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMap640 {
    entries: Vec<(Key640, Key160)>,
}

impl KeyMap640 {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a digest for a key.
    pub fn put(&mut self, key: Key640, digest: Key160) {
        self.entries.push((key, digest));
    }

    /// Looks up the digest for a key.
    pub fn get(&self, key: &Key640) -> Option<Key160> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, d)| *d)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(Key640, Key160)> {
        self.entries.iter()
    }
}

impl CanonicalEncode for KeyMap640 {
    fn encode(&self, buf: &mut BytesMut) {
        (self.entries.len() as u32).encode(buf);
        for (key, digest) in &self.entries {
            key.encode(buf);
            digest.encode(buf);
        }
    }
}

impl CanonicalDecode for KeyMap640 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let len = u32::decode(buf)? as usize;
        if len > crate::MAX_DATA_MAP_ENTRIES {
            return Err(DecodeError::LengthOverflow(len));
        }
        let mut entries = Vec::with_capacity(len);
        for _ in 0..len {
            let key = Key640::decode(buf)?;
            let digest = Key160::decode(buf)?;
            entries.push((key, digest));
        }
        Ok(Self { entries })
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

    fn k640(c: u8) -> Key640 {
        Key640::new(k(1), k(2), k(c), Key160::ZERO)
    }

    #[test]
    fn test_data_map_preserves_insertion_order() {
        let mut map = DataMap::new();
        // Deliberately unsorted keys.
        map.insert(k640(9), Data::new(&b"nine"[..]));
        map.insert(k640(1), Data::new(&b"one"[..]));
        map.insert(k640(5), Data::new(&b"five"[..]));

        let keys: Vec<_> = map.keys().copied().collect();
        assert_eq!(keys, vec![k640(9), k640(1), k640(5)]);

        let decoded = DataMap::from_bytes(&map.to_vec()).unwrap();
        let decoded_keys: Vec<_> = decoded.keys().copied().collect();
        assert_eq!(keys, decoded_keys);
    }

    #[test]
    fn test_data_map_insert_replaces_in_place() {
        let mut map = DataMap::new();
        map.insert(k640(1), Data::new(&b"a"[..]));
        map.insert(k640(2), Data::new(&b"b"[..]));
        map.insert(k640(1), Data::new(&b"c"[..]));

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&k640(1)).unwrap().payload().as_ref(), b"c");
        assert_eq!(map.keys().next(), Some(&k640(1)));
    }

    #[test]
    fn test_data_roundtrip_with_metadata() {
        let mut data = Data::new(&b"payload"[..]).with_ttl(60).protected();
        data.set_public_key(Some(stash_core::SigningKey::random().public_key()));

        let decoded = Data::from_bytes(&data.to_vec()).unwrap();
        assert_eq!(data, decoded);
        assert_eq!(decoded.ttl_secs(), 60);
        assert!(decoded.protect_entry());
    }

    #[test]
    fn test_key_collection_allows_duplicates() {
        let coll = KeyCollection::new(vec![k640(1), k640(1), k640(2)]);
        assert_eq!(coll.len(), 3);
    }

    #[test]
    fn test_key_map_byte_order_and_all_equal() {
        let mut map = KeyMapByte::new();
        map.put(k640(3), 0);
        map.put(k640(1), 0);
        assert!(map.all_equal(0));
        map.put(k640(2), 2);
        assert!(!map.all_equal(0));

        let decoded = KeyMapByte::from_bytes(&map.to_vec()).unwrap();
        let order: Vec<_> = decoded.iter().map(|(k, _)| *k).collect();
        assert_eq!(order, vec![k640(3), k640(1), k640(2)]);
    }

    #[test]
    fn test_data_hash_matches_payload_hash() {
        let data = Data::new(&b"X"[..]);
        assert_eq!(data.hash(), Key160::hash_of(b"X"));
    }
}
