//! In-memory entry store.
//!
//! A `BTreeMap` over `Key640` gives the lexicographic iteration the
//! range queries need; a side table records which buckets are
//! domain-protected and by whom. All maps sit behind `parking_lot`
//! locks; the store is shared by every handler task.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use stash_core::{Key320, Key640, PublicKey};
use stash_proto::{Data, DataMap, KeyBloomFilter};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::digest::DigestInfo;
use crate::{EntryStore, PutStatus};

struct StoredEntry {
    data: Data,
    /// Entry-level protection owner
    owner: Option<PublicKey>,
    /// Absolute expiry deadline, if the entry carries a TTL
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Thread-safe in-memory implementation of [`EntryStore`].
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Key640, StoredEntry>>,
    domain_owners: RwLock<HashMap<Key320, PublicKey>>,
    config: StoreConfig,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            domain_owners: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Number of live entries (expired entries still awaiting the sweep
    /// count too).
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// The protection owner of a bucket, if the bucket is protected.
    pub fn domain_owner(&self, bucket: &Key320) -> Option<PublicKey> {
        self.domain_owners.read().get(bucket).copied()
    }

    /// Drops every entry whose TTL elapsed. Driven by the owning
    /// service's maintenance interval.
    pub fn expire(&self) -> usize {
        if !self.config.expiration_enabled {
            return 0;
        }
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let dropped = before - entries.len();
        if dropped > 0 {
            debug!(dropped, "expired entries");
        }
        dropped
    }

    /// True when the write is allowed under the bucket's and entry's
    /// protection state. Both locks are held by the caller.
    fn write_permitted(
        domain_owner: Option<&PublicKey>,
        entry_owner: Option<&PublicKey>,
        public_key: Option<&PublicKey>,
    ) -> bool {
        match (domain_owner, entry_owner) {
            (None, None) => true,
            // Entry protection always admits its own key.
            (_, Some(owner)) if public_key == Some(owner) => true,
            (Some(owner), None) => public_key == Some(owner),
            // Domain key alone does not override entry protection.
            (Some(_), Some(_)) | (None, Some(_)) => false,
        }
    }

    fn collect_range(
        &self,
        min: &Key640,
        max: &Key640,
        mut keep: impl FnMut(&Key640, &Data) -> bool,
        limit: i32,
        ascending: bool,
    ) -> Vec<(Key640, Data)> {
        // An inverted range matches nothing (and would panic the
        // underlying tree's range call).
        if min > max {
            return Vec::new();
        }
        let now = Instant::now();
        let entries = self.entries.read();
        let live = entries
            .range(*min..=*max)
            .filter(|(_, entry)| !entry.is_expired(now));

        let mut out: Vec<(Key640, Data)> = Vec::new();
        let wanted = if limit < 0 { usize::MAX } else { limit as usize };

        if ascending {
            for (key, entry) in live {
                if out.len() >= wanted {
                    break;
                }
                if keep(key, &entry.data) {
                    out.push((*key, entry.data.clone()));
                }
            }
        } else {
            for (key, entry) in live.rev() {
                if out.len() >= wanted {
                    break;
                }
                if keep(key, &entry.data) {
                    out.push((*key, entry.data.clone()));
                }
            }
        }
        out
    }
}

impl EntryStore for MemoryStore {
    fn put(
        &self,
        key: Key640,
        mut data: Data,
        public_key: Option<&PublicKey>,
        put_if_absent: bool,
        protect_domain: bool,
    ) -> PutStatus {
        let bucket = key.bucket();
        let mut entries = self.entries.write();
        let mut domains = self.domain_owners.write();

        let now = Instant::now();
        let existing = entries.get(&key).filter(|entry| !entry.is_expired(now));

        // Bucket-level check first; an entry's own key may still admit
        // the write below.
        let domain_owner = domains.get(&bucket);
        let entry_owner = existing.and_then(|entry| entry.owner.as_ref());
        if !Self::write_permitted(domain_owner, entry_owner, public_key) {
            debug!(%key, "write rejected by protection state");
            return PutStatus::FailedSecurity;
        }

        if protect_domain {
            let Some(pk) = public_key else {
                warn!(%key, "domain protection requested without a public key");
                return PutStatus::FailedSecurity;
            };
            domains.entry(bucket).or_insert(*pk);
        }

        if existing.is_some() && put_if_absent {
            return PutStatus::FailedNotAbsent;
        }

        if existing.is_none() && entries.len() >= self.config.max_entries {
            warn!(%key, max = self.config.max_entries, "store full");
            return PutStatus::Failed;
        }

        let owner = if data.protect_entry() {
            public_key.copied()
        } else {
            None
        };
        // Record the protection owner so reads can echo it.
        data.set_public_key(owner.or_else(|| domains.get(&bucket).copied()));

        let expires_at = match data.ttl_secs() {
            0 => None,
            ttl => Some(Instant::now() + Duration::from_secs(u64::from(ttl))),
        };

        entries.insert(
            key,
            StoredEntry {
                data,
                owner,
                expires_at,
            },
        );
        PutStatus::Ok
    }

    fn get(&self, key: &Key640) -> Option<Data> {
        let now = Instant::now();
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.data.clone())
    }

    fn get_range(&self, min: &Key640, max: &Key640, limit: i32, ascending: bool) -> DataMap {
        self.collect_range(min, max, |_, _| true, limit, ascending)
            .into_iter()
            .collect()
    }

    fn get_filtered(
        &self,
        min: &Key640,
        max: &Key640,
        key_filter: Option<&KeyBloomFilter>,
        content_filter: Option<&KeyBloomFilter>,
        limit: i32,
        ascending: bool,
    ) -> DataMap {
        self.collect_range(
            min,
            max,
            |key, data| {
                key_filter.map_or(true, |f| f.contains(&key.content))
                    && content_filter.map_or(true, |f| f.contains(&data.hash()))
            },
            limit,
            ascending,
        )
        .into_iter()
        .collect()
    }

    fn remove(&self, key: &Key640, public_key: Option<&PublicKey>) -> Option<Data> {
        let mut entries = self.entries.write();
        let domains = self.domain_owners.read();

        let entry = entries.get(key)?;
        if entry.is_expired(Instant::now()) {
            entries.remove(key);
            return None;
        }
        let permitted = Self::write_permitted(
            domains.get(&key.bucket()),
            entry.owner.as_ref(),
            public_key,
        );
        if !permitted {
            debug!(%key, "removal rejected by protection state");
            return None;
        }
        entries.remove(key).map(|entry| entry.data)
    }

    fn remove_range(&self, min: &Key640, max: &Key640, public_key: Option<&PublicKey>) -> DataMap {
        if min > max {
            return DataMap::new();
        }
        let now = Instant::now();
        let mut entries = self.entries.write();
        let domains = self.domain_owners.read();

        let removable: Vec<Key640> = entries
            .range(*min..=*max)
            .filter(|(_, entry)| !entry.is_expired(now))
            .filter(|(key, entry)| {
                Self::write_permitted(
                    domains.get(&key.bucket()),
                    entry.owner.as_ref(),
                    public_key,
                )
            })
            .map(|(key, _)| *key)
            .collect();

        // Snapshot into a fresh map; the response encoder must never
        // alias the live tree.
        let mut removed = DataMap::new();
        for key in removable {
            if let Some(entry) = entries.remove(&key) {
                removed.insert(key, entry.data);
            }
        }
        removed
    }

    fn digest_keys(&self, keys: &[Key640]) -> DigestInfo {
        let now = Instant::now();
        let entries = self.entries.read();
        let mut info = DigestInfo::new();
        for key in keys {
            if let Some(entry) = entries.get(key).filter(|entry| !entry.is_expired(now)) {
                info.put(*key, entry.data.hash());
            }
        }
        info
    }

    fn digest_range(&self, min: &Key640, max: &Key640, limit: i32, ascending: bool) -> DigestInfo {
        let mut info = DigestInfo::new();
        for (key, data) in self.collect_range(min, max, |_, _| true, limit, ascending) {
            info.put(key, data.hash());
        }
        info
    }

    fn digest_filtered(
        &self,
        bucket: &Key320,
        key_filter: Option<&KeyBloomFilter>,
        content_filter: Option<&KeyBloomFilter>,
        limit: i32,
        ascending: bool,
    ) -> DigestInfo {
        let collected = self.collect_range(
            &bucket.min_key(),
            &bucket.max_key(),
            |key, data| {
                key_filter.map_or(true, |f| f.contains(&key.content))
                    && content_filter.map_or(true, |f| f.contains(&data.hash()))
            },
            limit,
            ascending,
        );
        let mut info = DigestInfo::new();
        for (key, data) in collected {
            info.put(key, data.hash());
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stash_core::{Key160, SigningKey};

    fn k(b: u8) -> Key160 {
        let mut bytes = [0u8; 20];
        bytes[19] = b;
        Key160::new(bytes)
    }

    fn key640(content: u8) -> Key640 {
        Key640::new(k(1), k(2), k(content), Key160::ZERO)
    }

    fn store() -> MemoryStore {
        MemoryStore::new(StoreConfig::default())
    }

    #[test]
    fn test_put_get_roundtrip() {
        let store = store();
        let status = store.put(key640(3), Data::new(&b"A"[..]), None, false, false);
        assert_eq!(status, PutStatus::Ok);
        assert_eq!(
            store.get(&key640(3)).unwrap().payload().as_ref(),
            b"A"
        );
    }

    #[test]
    fn test_put_if_absent_collision() {
        let store = store();
        assert_eq!(
            store.put(key640(1), Data::new(&b"B"[..]), None, true, false),
            PutStatus::Ok
        );
        assert_eq!(
            store.put(key640(1), Data::new(&b"C"[..]), None, true, false),
            PutStatus::FailedNotAbsent
        );
        // The original value is untouched.
        assert_eq!(store.get(&key640(1)).unwrap().payload().as_ref(), b"B");
    }

    #[test]
    fn test_domain_protection_rejects_foreign_key() {
        let store = store();
        let owner = SigningKey::random().public_key();
        let intruder = SigningKey::random().public_key();

        assert_eq!(
            store.put(key640(1), Data::new(&b"A"[..]), Some(&owner), false, true),
            PutStatus::Ok
        );
        // Unsigned and wrongly-signed writes both bounce.
        assert_eq!(
            store.put(key640(2), Data::new(&b"B"[..]), None, false, false),
            PutStatus::FailedSecurity
        );
        assert_eq!(
            store.put(key640(2), Data::new(&b"B"[..]), Some(&intruder), false, false),
            PutStatus::FailedSecurity
        );
        // The owner may keep writing.
        assert_eq!(
            store.put(key640(2), Data::new(&b"B"[..]), Some(&owner), false, false),
            PutStatus::Ok
        );
    }

    #[test]
    fn test_domain_claim_is_first_come() {
        let store = store();
        let first = SigningKey::random().public_key();
        let second = SigningKey::random().public_key();

        assert_eq!(
            store.put(key640(1), Data::new(&b"A"[..]), Some(&first), false, true),
            PutStatus::Ok
        );
        // A later claim with another key cannot steal the bucket.
        assert_eq!(
            store.put(key640(2), Data::new(&b"B"[..]), Some(&second), false, true),
            PutStatus::FailedSecurity
        );
        assert_eq!(store.domain_owner(&key640(1).bucket()), Some(first));
    }

    #[test]
    fn test_entry_protection_requires_owner_key() {
        let store = store();
        let owner = SigningKey::random().public_key();
        let intruder = SigningKey::random().public_key();

        let data = Data::new(&b"A"[..]).protected();
        assert_eq!(
            store.put(key640(1), data, Some(&owner), false, false),
            PutStatus::Ok
        );
        assert_eq!(
            store.put(key640(1), Data::new(&b"B"[..]), Some(&intruder), false, false),
            PutStatus::FailedSecurity
        );
        assert_eq!(
            store.put(key640(1), Data::new(&b"B"[..]), Some(&owner), false, false),
            PutStatus::Ok
        );
    }

    #[test]
    fn test_protected_remove_is_silent() {
        let store = store();
        let owner = SigningKey::random().public_key();
        let data = Data::new(&b"A"[..]).protected();
        store.put(key640(1), data, Some(&owner), false, false);

        assert!(store.remove(&key640(1), None).is_none());
        assert!(store.get(&key640(1)).is_some());

        let removed = store.remove(&key640(1), Some(&owner)).unwrap();
        assert_eq!(removed.payload().as_ref(), b"A");
        assert!(store.get(&key640(1)).is_none());
    }

    #[test]
    fn test_range_scan_order_and_limit() {
        let store = store();
        for content in [0x10u8, 0x20, 0x30, 0x40] {
            store.put(key640(content), Data::new(vec![content]), None, false, false);
        }
        let bucket = key640(0).bucket();

        let asc = store.get_range(&bucket.min_key(), &bucket.max_key(), -1, true);
        let asc_keys: Vec<u8> = asc.keys().map(|key| key.content.as_bytes()[19]).collect();
        assert_eq!(asc_keys, vec![0x10, 0x20, 0x30, 0x40]);

        let desc = store.get_range(&bucket.min_key(), &bucket.max_key(), 2, false);
        let desc_keys: Vec<u8> = desc.keys().map(|key| key.content.as_bytes()[19]).collect();
        assert_eq!(desc_keys, vec![0x40, 0x30]);
    }

    #[test]
    fn test_inverted_range_matches_nothing() {
        let store = store();
        store.put(key640(5), Data::new(&b"A"[..]), None, false, false);
        let result = store.get_range(&key640(9), &key640(1), -1, true);
        assert!(result.is_empty());
        assert!(store.remove_range(&key640(9), &key640(1), None).is_empty());
    }

    #[test]
    fn test_empty_bucket_scans_are_empty() {
        let store = store();
        let bucket = Key320::new(k(0xEE), k(0xEF));
        assert!(store
            .get_range(&bucket.min_key(), &bucket.max_key(), -1, true)
            .is_empty());
        assert!(store
            .digest_range(&bucket.min_key(), &bucket.max_key(), -1, true)
            .is_empty());
        assert!(store.remove_range(&bucket.min_key(), &bucket.max_key(), None).is_empty());
    }

    #[test]
    fn test_bloom_filtered_get() {
        let store = store();
        for content in 1..=4u8 {
            store.put(key640(content), Data::new(vec![content]), None, false, false);
        }
        let bucket = key640(0).bucket();

        let factory = stash_proto::BloomFilterFactory::default();
        let mut filter = factory.create();
        filter.insert(&k(2));
        filter.insert(&k(4));

        let result = store.get_filtered(
            &bucket.min_key(),
            &bucket.max_key(),
            Some(&filter),
            None,
            -1,
            true,
        );
        for key in result.keys() {
            assert!(filter.contains(&key.content));
        }
        assert!(result.contains_key(&key640(2)));
        assert!(result.contains_key(&key640(4)));
    }

    #[test]
    fn test_expiry_sweep() {
        let store = store();
        store.put(key640(1), Data::new(&b"A"[..]).with_ttl(1), None, false, false);
        store.put(key640(2), Data::new(&b"B"[..]), None, false, false);

        // Force the deadline into the past.
        {
            let mut entries = store.entries.write();
            if let Some(entry) = entries.get_mut(&key640(1)) {
                entry.expires_at = Some(Instant::now() - Duration::from_secs(1));
            }
        }

        assert!(store.get(&key640(1)).is_none());
        assert_eq!(store.expire(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_digest_uses_payload_hash() {
        let store = store();
        let data = Data::new(&b"X"[..]);
        let expected = data.hash();
        store.put(key640(1), data, None, false, false);

        let info = store.digest_keys(&[key640(1), key640(9)]);
        assert_eq!(info.len(), 1);
        assert_eq!(info.iter().next().unwrap().1, expected);
    }
}
