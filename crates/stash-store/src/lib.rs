//! Stash Store - The entry store consumed by the storage RPC.
//!
//! Defines the synchronous [`EntryStore`] contract (versioned entries
//! under `Key640`, domain- and entry-level protection, range and
//! bloom-filtered queries, digests) together with an in-memory
//! implementation, and the responsibility-notification seam toward the
//! replication subsystem.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod digest;
pub mod memory;
pub mod replication;

use stash_core::{Key320, Key640, PublicKey};
use stash_proto::{Data, DataMap, KeyBloomFilter};

pub use config::StoreConfig;
pub use digest::DigestInfo;
pub use memory::MemoryStore;
pub use replication::{ResponsibilityTracker, ResponsibilityUpdate};

/// Outcome of a single put, reported per entry.
///
/// The ordinal values travel as status bytes in PUT/ADD responses and
/// are frozen; reordering the variants breaks interop silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PutStatus {
    /// The entry was stored.
    Ok = 0,
    /// Put-if-absent hit an existing entry.
    FailedNotAbsent = 1,
    /// A protection check rejected the write.
    FailedSecurity = 2,
    /// The store could not take the entry.
    Failed = 3,
}

impl PutStatus {
    /// The wire ordinal.
    pub const fn ordinal(&self) -> u8 {
        *self as u8
    }

    /// Maps a wire ordinal back; unknown ordinals collapse to `Failed`.
    pub fn from_ordinal(ordinal: u8) -> Self {
        match ordinal {
            0 => PutStatus::Ok,
            1 => PutStatus::FailedNotAbsent,
            2 => PutStatus::FailedSecurity,
            _ => PutStatus::Failed,
        }
    }
}

/// The persistence contract the RPC layer consumes.
///
/// Implementations are thread-safe; all operations are synchronous and
/// must not block on I/O for unbounded time. The RPC layer keeps no
/// references into the store between requests.
pub trait EntryStore: Send + Sync {
    /// Stores `data` under `key`.
    ///
    /// `public_key` is the signer of the enclosing message, if any.
    /// `put_if_absent` refuses to overwrite; `protect_domain` claims the
    /// key's bucket for `public_key`.
    fn put(
        &self,
        key: Key640,
        data: Data,
        public_key: Option<&PublicKey>,
        put_if_absent: bool,
        protect_domain: bool,
    ) -> PutStatus;

    /// Reads a single entry.
    fn get(&self, key: &Key640) -> Option<Data>;

    /// Reads every entry with key in `[min, max]`, in the requested
    /// order, truncated to `limit` entries (`limit < 0` = unlimited).
    fn get_range(&self, min: &Key640, max: &Key640, limit: i32, ascending: bool) -> DataMap;

    /// Like [`get_range`](EntryStore::get_range) but keeps only entries
    /// passing every present filter: `key_filter` matches the content
    /// key, `content_filter` the payload hash.
    fn get_filtered(
        &self,
        min: &Key640,
        max: &Key640,
        key_filter: Option<&KeyBloomFilter>,
        content_filter: Option<&KeyBloomFilter>,
        limit: i32,
        ascending: bool,
    ) -> DataMap;

    /// Removes a single entry; `None` when absent or when a protection
    /// check rejects the caller.
    fn remove(&self, key: &Key640, public_key: Option<&PublicKey>) -> Option<Data>;

    /// Removes every removable entry with key in `[min, max]` and
    /// returns a snapshot of what was removed.
    fn remove_range(&self, min: &Key640, max: &Key640, public_key: Option<&PublicKey>) -> DataMap;

    /// Digests exactly the listed keys, skipping absent ones, in list
    /// order.
    fn digest_keys(&self, keys: &[Key640]) -> DigestInfo;

    /// Digests the entries with key in `[min, max]`.
    fn digest_range(&self, min: &Key640, max: &Key640, limit: i32, ascending: bool) -> DigestInfo;

    /// Digests a bucket under bloom-filter constraints.
    fn digest_filtered(
        &self,
        bucket: &Key320,
        key_filter: Option<&KeyBloomFilter>,
        content_filter: Option<&KeyBloomFilter>,
        limit: i32,
        ascending: bool,
    ) -> DigestInfo;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_status_ordinals_frozen() {
        assert_eq!(PutStatus::Ok.ordinal(), 0);
        assert_eq!(PutStatus::FailedNotAbsent.ordinal(), 1);
        assert_eq!(PutStatus::FailedSecurity.ordinal(), 2);
        assert_eq!(PutStatus::Failed.ordinal(), 3);
    }

    #[test]
    fn test_unknown_ordinal_collapses_to_failed() {
        assert_eq!(PutStatus::from_ordinal(200), PutStatus::Failed);
        for ordinal in 0..4 {
            assert_eq!(PutStatus::from_ordinal(ordinal).ordinal(), ordinal);
        }
    }
}
