//! Server-side request handlers.
//!
//! One [`StorageRpc`] instance serves all five commands against a shared
//! entry store. Handling is synchronous and linear per message: validate,
//! dispatch on the command, execute against the store, mark the response
//! type, sign when asked. Malformed requests answer EXCEPTION and never
//! touch the store; per-entry failures travel as status bytes, not as
//! message-level errors.

use std::sync::Arc;

use stash_core::{Key160, Key320, Key640, SigningKey};
use stash_net::MessageHandler;
use stash_proto::{
    BloomFilterFactory, Command, DataMap, KeyCollection, KeyMapByte, Message, MessageType,
};
use stash_store::{DigestInfo, EntryStore, PutStatus, ResponsibilityTracker};
use tracing::{debug, warn};

use crate::semantics::{AddSemantics, PutSemantics, QuerySemantics, RemoveSemantics};
use crate::{RpcError, MAX_ADD_KEY_ATTEMPTS};

/// The storage RPC dispatcher.
pub struct StorageRpc {
    store: Arc<dyn EntryStore>,
    replication: Option<Arc<ResponsibilityTracker>>,
    bloom_factory: BloomFilterFactory,
    signing_key: SigningKey,
    local_id: Key160,
}

/// The three query shapes GET and DIGEST share; the fourth (bloom
/// filtering) is a refinement of the bucket scan.
enum QueryShape<'a> {
    /// Exactly the listed keys, in list order
    Collection(&'a KeyCollection),
    /// Every key in `[from, to]`
    Range {
        from: Key640,
        to: Key640,
        limit: i32,
    },
    /// A whole `(location, domain)` bucket
    Bucket { bucket: Key320, limit: i32 },
}

impl StorageRpc {
    /// Creates a dispatcher over `store`, signing responses with
    /// `signing_key` when requests ask for it.
    pub fn new(local_id: Key160, signing_key: SigningKey, store: Arc<dyn EntryStore>) -> Self {
        Self {
            store,
            replication: None,
            bloom_factory: BloomFilterFactory::default(),
            signing_key,
            local_id,
        }
    }

    /// Attaches the replication seam notified after successful writes.
    pub fn with_replication(mut self, tracker: Arc<ResponsibilityTracker>) -> Self {
        self.replication = Some(tracker);
        self
    }

    /// Overrides the factory used for digest bloom responses.
    pub fn with_bloom_factory(mut self, factory: BloomFilterFactory) -> Self {
        self.bloom_factory = factory;
        self
    }

    /// This peer's id.
    pub fn local_id(&self) -> Key160 {
        self.local_id
    }

    /// Handles one request, always producing a response.
    pub fn handle_request(&self, request: Message) -> Message {
        let mut response = match self.try_handle(&request) {
            Ok(response) => response,
            Err(err) => {
                warn!(id = request.id(), command = ?request.command(), %err, "request rejected");
                Message::response_to(&request, MessageType::Exception)
            }
        };
        if request.wants_signed_response() {
            response.sign(&self.signing_key);
        }
        response
    }

    fn try_handle(&self, request: &Message) -> Result<Message, RpcError> {
        if !request.message_type().is_request() {
            return Err(RpcError::malformed("message type is not a request variant"));
        }
        request.verify_signature()?;

        let mtype = request.message_type();
        match request.command() {
            Command::Put => self.handle_put(request, PutSemantics::from_type(mtype)?),
            Command::Add => self.handle_add(request, AddSemantics::from_type(mtype)?),
            Command::Get => self.handle_get(request, QuerySemantics::from_type(mtype)?),
            Command::Digest => self.handle_digest(request, QuerySemantics::from_type(mtype)?),
            Command::Remove => self.handle_remove(request, RemoveSemantics::from_type(mtype)?),
        }
    }

    /// A domain claim needs both the variant flag and a signed message.
    fn protect_domain(request: &Message, requested: bool) -> bool {
        requested && request.public_key().is_some()
    }

    fn notify_responsibility(&self, location: Key160) {
        if let Some(tracker) = &self.replication {
            tracker.update_and_notify_responsibilities(location);
        }
    }

    fn handle_put(&self, request: &Message, sem: PutSemantics) -> Result<Message, RpcError> {
        let to_store = request
            .data_map(0)
            .ok_or_else(|| RpcError::malformed("PUT carries no data map"))?;
        if to_store.is_empty() {
            return Err(RpcError::malformed("PUT data map is empty"));
        }
        let public_key = request.public_key();
        let protect_domain = Self::protect_domain(request, sem.protect_domain);

        let mut statuses = KeyMapByte::new();
        let mut all_ok = true;
        for (key, data) in to_store.iter() {
            debug!(%key, peer = %self.local_id, "put");
            let status = self.store.put(
                *key,
                data.clone(),
                public_key,
                sem.put_if_absent,
                protect_domain,
            );
            statuses.put(*key, status.ordinal());
            if status == PutStatus::Ok {
                self.notify_responsibility(key.location);
            } else {
                all_ok = false;
            }
        }

        let mtype = if all_ok {
            MessageType::Ok
        } else {
            MessageType::PartiallyOk
        };
        let mut response = Message::response_to(request, mtype);
        response.add_key_map_byte(statuses);
        Ok(response)
    }

    fn handle_add(&self, request: &Message, sem: AddSemantics) -> Result<Message, RpcError> {
        let to_store = request
            .data_map(0)
            .ok_or_else(|| RpcError::malformed("ADD carries no data map"))?;
        if to_store.is_empty() {
            return Err(RpcError::malformed("ADD data map is empty"));
        }
        let public_key = request.public_key();
        let protect_domain = Self::protect_domain(request, sem.protect_domain);

        let mut statuses = KeyMapByte::new();
        for (key, data) in to_store.iter() {
            debug!(%key, list = sem.list, peer = %self.local_id, "add");
            let status = if sem.list {
                self.add_with_fresh_key(key, data, request, protect_domain)
            } else {
                self.store
                    .put(*key, data.clone(), public_key, false, protect_domain)
            };
            // Status lands under the key the client sent, whatever
            // content key the entry ended up stored at.
            statuses.put(*key, status.ordinal());
            if status == PutStatus::Ok {
                self.notify_responsibility(key.location);
            }
        }

        // ADD responses are always OK; the status bytes carry failures.
        let mut response = Message::response_to(request, MessageType::Ok);
        response.add_key_map_byte(statuses);
        Ok(response)
    }

    /// Rolls fresh random content keys until the put lands or the
    /// attempt cap is hit, then surfaces the last status.
    fn add_with_fresh_key(
        &self,
        key: &Key640,
        data: &stash_proto::Data,
        request: &Message,
        protect_domain: bool,
    ) -> PutStatus {
        let mut status = PutStatus::FailedNotAbsent;
        for _ in 0..MAX_ADD_KEY_ATTEMPTS {
            let candidate = key.with_content(Key160::random());
            status = self.store.put(
                candidate,
                data.clone(),
                request.public_key(),
                true,
                protect_domain,
            );
            if status != PutStatus::FailedNotAbsent {
                return status;
            }
        }
        warn!(%key, "no free content key after {MAX_ADD_KEY_ATTEMPTS} attempts");
        status
    }

    /// Reads the query shape shared by GET and DIGEST.
    ///
    /// A key collection with the integer slot set is a range (the two
    /// keys are its bounds); without the integer it lists exact keys;
    /// with no collection the scan covers a whole bucket, which needs
    /// location and domain.
    fn query_shape<'a>(&self, request: &'a Message) -> Result<QueryShape<'a>, RpcError> {
        let collection = request.key_collection(0);
        let limit = request.integer(0);

        match (collection, limit) {
            (Some(collection), Some(limit)) => {
                let keys = collection.keys();
                if keys.len() != 2 {
                    return Err(RpcError::malformed(format!(
                        "range query carries {} keys, expected exactly 2",
                        keys.len()
                    )));
                }
                Ok(QueryShape::Range {
                    from: keys[0],
                    to: keys[1],
                    limit,
                })
            }
            (Some(collection), None) => Ok(QueryShape::Collection(collection)),
            (None, limit) => {
                let (Some(location), Some(domain)) = (request.key(0), request.key(1)) else {
                    return Err(RpcError::malformed(
                        "bucket query needs location and domain keys",
                    ));
                };
                Ok(QueryShape::Bucket {
                    bucket: Key320::new(location, domain),
                    limit: limit.unwrap_or(-1),
                })
            }
        }
    }

    fn handle_get(&self, request: &Message, sem: QuerySemantics) -> Result<Message, RpcError> {
        let result: DataMap = match self.query_shape(request)? {
            QueryShape::Collection(collection) => {
                let mut found = DataMap::new();
                for key in collection.iter() {
                    if let Some(data) = self.store.get(key) {
                        found.insert(*key, data);
                    }
                }
                found
            }
            QueryShape::Range { from, to, limit } => {
                self.store.get_range(&from, &to, limit, sem.ascending)
            }
            QueryShape::Bucket { bucket, limit } => {
                let key_filter = request.bloom_filter(0);
                let content_filter = request.bloom_filter(1);
                if key_filter.is_some() || content_filter.is_some() {
                    self.store.get_filtered(
                        &bucket.min_key(),
                        &bucket.max_key(),
                        key_filter,
                        content_filter,
                        limit,
                        sem.ascending,
                    )
                } else {
                    self.store
                        .get_range(&bucket.min_key(), &bucket.max_key(), limit, sem.ascending)
                }
            }
        };
        debug!(id = request.id(), hits = result.len(), "get");

        let mut response = Message::response_to(request, MessageType::Ok);
        response.add_data_map(result);
        Ok(response)
    }

    fn handle_digest(&self, request: &Message, sem: QuerySemantics) -> Result<Message, RpcError> {
        let info: DigestInfo = match self.query_shape(request)? {
            QueryShape::Collection(collection) => self.store.digest_keys(collection.keys()),
            QueryShape::Range { from, to, limit } => {
                self.store.digest_range(&from, &to, limit, sem.ascending)
            }
            QueryShape::Bucket { bucket, limit } => {
                let key_filter = request.bloom_filter(0);
                let content_filter = request.bloom_filter(1);
                if key_filter.is_some() || content_filter.is_some() {
                    self.store.digest_filtered(
                        &bucket,
                        key_filter,
                        content_filter,
                        limit,
                        sem.ascending,
                    )
                } else {
                    self.store
                        .digest_range(&bucket.min_key(), &bucket.max_key(), limit, sem.ascending)
                }
            }
        };
        debug!(id = request.id(), hits = info.len(), "digest");

        let mut response = Message::response_to(request, MessageType::Ok);
        if sem.return_bloom {
            // Scans not pinned to one bucket also summarize where the
            // matches live.
            if request.key(0).is_none() && request.key(1).is_none() {
                response.add_bloom_filter(Some(info.location_key_filter(&self.bloom_factory)));
                response.add_bloom_filter(Some(info.domain_key_filter(&self.bloom_factory)));
            }
            response.add_bloom_filter(Some(info.content_key_filter(&self.bloom_factory)));
            response.add_bloom_filter(Some(info.version_key_filter(&self.bloom_factory)));
        } else {
            response.add_key_map_640(info.to_key_map());
        }
        Ok(response)
    }

    fn handle_remove(&self, request: &Message, sem: RemoveSemantics) -> Result<Message, RpcError> {
        let public_key = request.public_key();

        let removed: DataMap = if let Some(collection) = request.key_collection(0) {
            let mut removed = DataMap::new();
            for key in collection.iter() {
                // Protection rejections stay silent: the response only
                // lists what actually went away.
                if let Some(data) = self.store.remove(key, public_key) {
                    removed.insert(*key, data);
                }
            }
            removed
        } else if let (Some(location), Some(domain)) = (request.key(0), request.key(1)) {
            let bucket = Key320::new(location, domain);
            self.store
                .remove_range(&bucket.min_key(), &bucket.max_key(), public_key)
        } else {
            return Err(RpcError::malformed(
                "REMOVE needs a key collection or location and domain keys",
            ));
        };
        debug!(id = request.id(), removed = removed.len(), "remove");

        let mut response = Message::response_to(request, MessageType::Ok);
        if sem.echo_results {
            response.add_data_map(removed);
        } else {
            response.add_key_collection(KeyCollection::new(removed.keys().copied()));
        }
        Ok(response)
    }
}

impl MessageHandler for StorageRpc {
    fn handle(&self, message: Message) -> Message {
        self.handle_request(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stash_proto::Data;
    use stash_store::{MemoryStore, StoreConfig};

    fn k(b: u8) -> Key160 {
        let mut bytes = [0u8; 20];
        bytes[19] = b;
        Key160::new(bytes)
    }

    fn key640(content: u8) -> Key640 {
        Key640::new(k(1), k(2), k(content), Key160::ZERO)
    }

    fn rpc() -> StorageRpc {
        StorageRpc::new(
            k(0xEE),
            SigningKey::random(),
            Arc::new(MemoryStore::new(StoreConfig::default())),
        )
    }

    fn put_request(entries: &[(u8, &[u8])], mtype: MessageType) -> Message {
        let mut map = DataMap::new();
        for (content, payload) in entries {
            map.insert(key640(*content), Data::new(payload.to_vec()));
        }
        let mut msg = Message::request(1, Command::Put, mtype, k(0xAA), k(0xEE));
        msg.add_data_map(map);
        msg
    }

    #[test]
    fn test_put_reports_status_per_entry_in_order() {
        let rpc = rpc();
        let response = rpc.handle_request(put_request(
            &[(9, b"nine"), (1, b"one"), (5, b"five")],
            MessageType::Request1,
        ));

        assert_eq!(response.message_type(), MessageType::Ok);
        let statuses = response.key_map_byte(0).unwrap();
        assert_eq!(statuses.len(), 3);
        let order: Vec<u8> = statuses
            .iter()
            .map(|(key, _)| key.content.as_bytes()[19])
            .collect();
        assert_eq!(order, vec![9, 1, 5]);
        assert!(statuses.all_equal(PutStatus::Ok.ordinal()));
    }

    #[test]
    fn test_put_if_absent_partial_on_second_round() {
        let rpc = rpc();
        let first = rpc.handle_request(put_request(&[(1, b"B")], MessageType::Request3));
        assert_eq!(first.message_type(), MessageType::Ok);

        let second = rpc.handle_request(put_request(&[(1, b"C")], MessageType::Request3));
        assert_eq!(second.message_type(), MessageType::PartiallyOk);
        let statuses = second.key_map_byte(0).unwrap();
        assert_eq!(
            statuses.get(&key640(1)),
            Some(PutStatus::FailedNotAbsent.ordinal())
        );
    }

    #[test]
    fn test_empty_put_is_an_exception() {
        let rpc = rpc();
        let mut msg = Message::request(1, Command::Put, MessageType::Request1, k(0xAA), k(0xEE));
        msg.add_data_map(DataMap::new());
        let response = rpc.handle_request(msg);
        assert_eq!(response.message_type(), MessageType::Exception);
    }

    #[test]
    fn test_wrong_variant_for_remove_is_an_exception() {
        let rpc = rpc();
        let mut msg = Message::request(1, Command::Remove, MessageType::Request3, k(0xAA), k(0xEE));
        msg.add_key(k(1));
        msg.add_key(k(2));
        let response = rpc.handle_request(msg);
        assert_eq!(response.message_type(), MessageType::Exception);
    }

    #[test]
    fn test_get_bucket_scan_roundtrip() {
        let rpc = rpc();
        rpc.handle_request(put_request(&[(3, b"A")], MessageType::Request1));

        let mut get = Message::request(2, Command::Get, MessageType::Request1, k(0xAA), k(0xEE));
        get.add_key(k(1));
        get.add_key(k(2));
        get.add_integer(-1);
        let response = rpc.handle_request(get);

        assert_eq!(response.message_type(), MessageType::Ok);
        let map = response.data_map(0).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&key640(3)).unwrap().payload().as_ref(), b"A");
    }

    #[test]
    fn test_get_empty_bucket_is_ok_and_empty() {
        let rpc = rpc();
        let mut get = Message::request(2, Command::Get, MessageType::Request1, k(0xAA), k(0xEE));
        get.add_key(k(0x77));
        get.add_key(k(0x78));
        get.add_integer(-1);
        let response = rpc.handle_request(get);
        assert_eq!(response.message_type(), MessageType::Ok);
        assert!(response.data_map(0).unwrap().is_empty());
    }

    #[test]
    fn test_get_without_bucket_keys_is_an_exception() {
        let rpc = rpc();
        let get = Message::request(2, Command::Get, MessageType::Request1, k(0xAA), k(0xEE));
        let response = rpc.handle_request(get);
        assert_eq!(response.message_type(), MessageType::Exception);
    }

    #[test]
    fn test_get_descending_range_with_limit() {
        let rpc = rpc();
        rpc.handle_request(put_request(
            &[(0x10, b"a"), (0x20, b"b"), (0x30, b"c"), (0x40, b"d")],
            MessageType::Request1,
        ));

        let mut get = Message::request(3, Command::Get, MessageType::Request3, k(0xAA), k(0xEE));
        get.add_integer(2);
        get.add_key_collection(KeyCollection::new(vec![key640(0x10), key640(0x40)]));
        let response = rpc.handle_request(get);

        let map = response.data_map(0).unwrap();
        let contents: Vec<u8> = map.keys().map(|key| key.content.as_bytes()[19]).collect();
        assert_eq!(contents, vec![0x40, 0x30]);
    }

    #[test]
    fn test_add_list_mode_keeps_duplicates() {
        let rpc = rpc();
        let mut map = DataMap::new();
        for content in [1u8, 2, 3] {
            map.insert(key640(content), Data::new(&b"X"[..]));
        }
        let mut add = Message::request(4, Command::Add, MessageType::Request3, k(0xAA), k(0xEE));
        add.add_data_map(map);
        let response = rpc.handle_request(add);
        assert_eq!(response.message_type(), MessageType::Ok);
        assert!(response
            .key_map_byte(0)
            .unwrap()
            .all_equal(PutStatus::Ok.ordinal()));

        // All three landed under distinct fresh content keys.
        let mut get = Message::request(5, Command::Get, MessageType::Request1, k(0xAA), k(0xEE));
        get.add_key(k(1));
        get.add_key(k(2));
        get.add_integer(-1);
        let stored = rpc.handle_request(get);
        let map = stored.data_map(0).unwrap();
        assert_eq!(map.len(), 3);
        for (_, data) in map.iter() {
            assert_eq!(data.payload().as_ref(), b"X");
        }
    }

    #[test]
    fn test_remove_echo_returns_data() {
        let rpc = rpc();
        rpc.handle_request(put_request(&[(3, b"A")], MessageType::Request1));

        let mut remove =
            Message::request(6, Command::Remove, MessageType::Request2, k(0xAA), k(0xEE));
        remove.add_key_collection(KeyCollection::new(vec![key640(3)]));
        let response = rpc.handle_request(remove);

        let echoed = response.data_map(0).unwrap();
        assert_eq!(echoed.len(), 1);
        assert_eq!(echoed.get(&key640(3)).unwrap().payload().as_ref(), b"A");
        assert!(response.key_collection(0).is_none());
    }

    #[test]
    fn test_remove_without_echo_returns_keys_only() {
        let rpc = rpc();
        rpc.handle_request(put_request(&[(3, b"A"), (4, b"B")], MessageType::Request1));

        let mut remove =
            Message::request(7, Command::Remove, MessageType::Request1, k(0xAA), k(0xEE));
        remove.add_key(k(1));
        remove.add_key(k(2));
        let response = rpc.handle_request(remove);

        let keys = response.key_collection(0).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(response.data_map(0).is_none());
    }

    #[test]
    fn test_digest_bucket_bloom_has_two_filters() {
        let rpc = rpc();
        rpc.handle_request(put_request(
            &[(1, b"a"), (2, b"b"), (3, b"c")],
            MessageType::Request1,
        ));

        let mut digest =
            Message::request(8, Command::Digest, MessageType::Request2, k(0xAA), k(0xEE));
        digest.add_key(k(1));
        digest.add_key(k(2));
        digest.add_integer(-1);
        let response = rpc.handle_request(digest);

        assert_eq!(response.bloom_filter_count(), 2);
        let content_filter = response.bloom_filter(0).unwrap();
        for content in [k(1), k(2), k(3)] {
            assert!(content_filter.contains(&content));
        }
        let version_filter = response.bloom_filter(1).unwrap();
        assert!(version_filter.contains(&Key160::ZERO));
    }

    #[test]
    fn test_digest_collection_bloom_has_four_filters() {
        let rpc = rpc();
        rpc.handle_request(put_request(&[(1, b"a")], MessageType::Request1));

        let mut digest =
            Message::request(9, Command::Digest, MessageType::Request2, k(0xAA), k(0xEE));
        digest.add_key_collection(KeyCollection::new(vec![key640(1)]));
        let response = rpc.handle_request(digest);

        assert_eq!(response.bloom_filter_count(), 4);
        assert!(response.bloom_filter(0).unwrap().contains(&k(1)));
        assert!(response.bloom_filter(1).unwrap().contains(&k(2)));
    }

    #[test]
    fn test_digest_non_bloom_returns_key_map() {
        let rpc = rpc();
        rpc.handle_request(put_request(&[(1, b"a"), (2, b"b")], MessageType::Request1));

        let mut digest =
            Message::request(10, Command::Digest, MessageType::Request1, k(0xAA), k(0xEE));
        digest.add_key(k(1));
        digest.add_key(k(2));
        digest.add_integer(-1);
        let response = rpc.handle_request(digest);

        let map = response.key_map_640(0).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.get(&key640(1)),
            Some(Key160::hash_of(b"a"))
        );
    }

    #[test]
    fn test_signed_response_on_request() {
        let rpc = rpc();
        let mut request = put_request(&[(1, b"a")], MessageType::Request1);
        request.set_wants_signed_response(true);
        let response = rpc.handle_request(request);
        assert!(response.is_signed());
        response.verify_signature().unwrap();
    }

    #[test]
    fn test_tampered_signature_is_an_exception() {
        let rpc = rpc();
        let mut request = put_request(&[(1, b"a")], MessageType::Request1);
        request.sign(&SigningKey::random());
        request.add_integer(1); // invalidates the signature
        let response = rpc.handle_request(request);
        assert_eq!(response.message_type(), MessageType::Exception);
    }

    #[test]
    fn test_replication_notified_per_successful_entry() {
        let (tracker, mut rx) = ResponsibilityTracker::new();
        let rpc = rpc().with_replication(Arc::new(tracker));

        rpc.handle_request(put_request(&[(1, b"a"), (2, b"b")], MessageType::Request1));
        assert_eq!(rx.try_recv().unwrap().location, k(1));
        assert_eq!(rx.try_recv().unwrap().location, k(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_domain_protection_end_to_end() {
        let owner = SigningKey::random();
        let intruder = SigningKey::random();
        let rpc = rpc();

        // Owner claims the domain.
        let mut claim = put_request(&[(1, b"a")], MessageType::Request2);
        claim.sign(&owner);
        assert_eq!(rpc.handle_request(claim).message_type(), MessageType::Ok);

        // Foreign overwrite attempt fails on every entry.
        let mut attack = put_request(&[(1, b"x"), (2, b"y")], MessageType::Request1);
        attack.sign(&intruder);
        let response = rpc.handle_request(attack);
        assert_eq!(response.message_type(), MessageType::PartiallyOk);
        let statuses = response.key_map_byte(0).unwrap();
        assert!(statuses.all_equal(PutStatus::FailedSecurity.ordinal()));
    }
}
