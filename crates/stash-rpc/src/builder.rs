//! Client-side operation builders.
//!
//! A builder carries the caller's intent; lowering it picks the request
//! variant, populates the message slots, and signs when asked. Builders
//! validate before lowering: PUT and ADD need data, queries need a key
//! collection, a range, or a `(location, domain)` pair, and a collection
//! and a range never appear together.

use stash_core::{Key160, Key640, SigningKey};
use stash_proto::{
    Command, Data, DataMap, KeyBloomFilter, KeyCollection, Message,
};

use crate::semantics::{AddSemantics, PutSemantics, QuerySemantics, RemoveSemantics};
use crate::RpcError;

/// Builder for PUT: store entries, overwriting per variant.
#[derive(Debug, Clone)]
pub struct PutBuilder {
    location: Key160,
    domain: Key160,
    version: Key160,
    content: Vec<(Key160, Data)>,
    whole_map: Option<DataMap>,
    put_if_absent: bool,
    protect_domain: bool,
    protect_entry: bool,
    sign_message: bool,
    sign_response: bool,
    force_udp: bool,
}

impl PutBuilder {
    /// Starts a PUT into `(location, domain)`.
    pub fn new(location: Key160, domain: Key160) -> Self {
        Self {
            location,
            domain,
            version: Key160::ZERO,
            content: Vec::new(),
            whole_map: None,
            put_if_absent: false,
            protect_domain: false,
            protect_entry: false,
            sign_message: false,
            sign_response: false,
            force_udp: false,
        }
    }

    /// Adds one entry under `content_key`.
    pub fn data(mut self, content_key: Key160, data: Data) -> Self {
        self.content.push((content_key, data));
        self
    }

    /// Adds one entry keyed by its payload hash.
    pub fn data_hashed(self, data: Data) -> Self {
        let key = data.hash();
        self.data(key, data)
    }

    /// Stores a pre-assembled full map instead of per-content entries.
    pub fn data_map(mut self, map: DataMap) -> Self {
        self.whole_map = Some(map);
        self
    }

    /// Sets the version key for all entries.
    pub fn version(mut self, version: Key160) -> Self {
        self.version = version;
        self
    }

    /// Only store where no entry exists yet.
    pub fn put_if_absent(mut self) -> Self {
        self.put_if_absent = true;
        self
    }

    /// Claim the bucket for this peer's key. Implies signing.
    pub fn protect_domain(mut self) -> Self {
        self.protect_domain = true;
        self
    }

    /// Protect each entry with this peer's key. Implies signing.
    pub fn protect_entry(mut self) -> Self {
        self.protect_entry = true;
        self
    }

    /// Attach the public key and sign the message.
    pub fn sign_message(mut self) -> Self {
        self.sign_message = true;
        self
    }

    /// Ask the peer to sign its response.
    pub fn sign_response(mut self) -> Self {
        self.sign_response = true;
        self
    }

    /// Send over UDP instead of the default TCP.
    pub fn force_udp(mut self) -> Self {
        self.force_udp = true;
        self
    }

    pub(crate) fn is_force_udp(&self) -> bool {
        self.force_udp
    }

    pub(crate) fn build_request(
        &self,
        id: u64,
        sender: Key160,
        recipient: Key160,
        signing_key: &SigningKey,
    ) -> Result<Message, RpcError> {
        let mut map = match &self.whole_map {
            Some(map) => map.clone(),
            None => DataMap::from_content(
                self.location,
                self.domain,
                self.version,
                self.content.iter().cloned(),
            ),
        };
        if map.is_empty() {
            return Err(RpcError::malformed("PUT needs at least one entry"));
        }
        if self.protect_entry {
            map = map
                .into_iter()
                .map(|(key, data)| (key, data.protected()))
                .collect();
        }

        let sem = PutSemantics {
            put_if_absent: self.put_if_absent,
            protect_domain: self.protect_domain,
        };
        let mut message = Message::request(id, Command::Put, sem.to_type(), sender, recipient);
        if self.sign_response {
            message.set_wants_signed_response(true);
        }
        message.add_data_map(map);
        if self.sign_message || self.protect_domain || self.protect_entry {
            message.sign(signing_key);
        }
        Ok(message)
    }
}

/// Builder for ADD: create-only stores, hashed or list keyed.
#[derive(Debug, Clone)]
pub struct AddBuilder {
    location: Key160,
    domain: Key160,
    version: Key160,
    data_set: Vec<Data>,
    list: bool,
    protect_domain: bool,
    sign_message: bool,
    sign_response: bool,
    force_udp: bool,
}

impl AddBuilder {
    /// Starts an ADD into `(location, domain)`.
    pub fn new(location: Key160, domain: Key160) -> Self {
        Self {
            location,
            domain,
            version: Key160::ZERO,
            data_set: Vec::new(),
            list: false,
            protect_domain: false,
            sign_message: false,
            sign_response: false,
            force_udp: false,
        }
    }

    /// Adds a value to store.
    pub fn data(mut self, data: Data) -> Self {
        self.data_set.push(data);
        self
    }

    /// Sets the version key for all entries.
    pub fn version(mut self, version: Key160) -> Self {
        self.version = version;
        self
    }

    /// List mode: random content keys so duplicate payloads coexist.
    pub fn list(mut self) -> Self {
        self.list = true;
        self
    }

    /// Claim the bucket for this peer's key. Implies signing.
    pub fn protect_domain(mut self) -> Self {
        self.protect_domain = true;
        self
    }

    /// Attach the public key and sign the message.
    pub fn sign_message(mut self) -> Self {
        self.sign_message = true;
        self
    }

    /// Ask the peer to sign its response.
    pub fn sign_response(mut self) -> Self {
        self.sign_response = true;
        self
    }

    /// Send over UDP instead of the default TCP.
    pub fn force_udp(mut self) -> Self {
        self.force_udp = true;
        self
    }

    pub(crate) fn is_force_udp(&self) -> bool {
        self.force_udp
    }

    pub(crate) fn build_request(
        &self,
        id: u64,
        sender: Key160,
        recipient: Key160,
        signing_key: &SigningKey,
    ) -> Result<Message, RpcError> {
        if self.data_set.is_empty() {
            return Err(RpcError::malformed("ADD needs at least one value"));
        }

        let mut content: Vec<(Key160, Data)> = Vec::with_capacity(self.data_set.len());
        for data in &self.data_set {
            let content_key = if self.list {
                // A provisional random key; the server rolls its own
                // fresh one per entry. It only has to be unique here.
                let mut key = Key160::random();
                while content.iter().any(|(existing, _)| *existing == key) {
                    key = Key160::random();
                }
                key
            } else {
                data.hash()
            };
            content.push((content_key, data.clone()));
        }
        // Hashed mode collapses equal payloads onto one key here.
        let map = DataMap::from_content(self.location, self.domain, self.version, content);

        let sem = AddSemantics {
            list: self.list,
            protect_domain: self.protect_domain,
        };
        let mut message = Message::request(id, Command::Add, sem.to_type(), sender, recipient);
        if self.sign_response {
            message.set_wants_signed_response(true);
        }
        message.add_data_map(map);
        if self.sign_message || self.protect_domain {
            message.sign(signing_key);
        }
        Ok(message)
    }
}

/// The query surface GET and DIGEST share.
#[derive(Debug, Clone)]
struct QueryParams {
    location: Option<Key160>,
    domain: Option<Key160>,
    version: Key160,
    content_keys: Option<Vec<Key160>>,
    keys: Option<Vec<Key640>>,
    range: Option<(Key640, Key640)>,
    return_nr: i32,
    ascending: bool,
    return_bloom: bool,
    key_filter: Option<KeyBloomFilter>,
    content_filter: Option<KeyBloomFilter>,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            location: None,
            domain: None,
            version: Key160::ZERO,
            content_keys: None,
            keys: None,
            range: None,
            return_nr: -1,
            ascending: true,
            return_bloom: false,
            key_filter: None,
            content_filter: None,
        }
    }
}

impl QueryParams {
    fn semantics(&self) -> QuerySemantics {
        QuerySemantics {
            ascending: self.ascending,
            return_bloom: self.return_bloom,
        }
    }

    fn validate(&self) -> Result<(), RpcError> {
        if self.keys.is_some() && self.range.is_some() {
            return Err(RpcError::malformed(
                "a key collection and a range are mutually exclusive",
            ));
        }
        if self.keys.is_none()
            && self.range.is_none()
            && (self.location.is_none() || self.domain.is_none())
        {
            return Err(RpcError::malformed(
                "query needs a key collection, a range, or location and domain",
            ));
        }
        Ok(())
    }

    /// Writes the slots that express this query's shape.
    fn populate(&self, message: &mut Message) {
        if let Some((from, to)) = self.range {
            message.add_integer(self.return_nr);
            message.add_key_collection(KeyCollection::new([from, to]));
        } else if let Some(keys) = &self.keys {
            message.add_key_collection(KeyCollection::new(keys.iter().copied()));
        } else {
            // Checked by validate().
            let (Some(location), Some(domain)) = (self.location, self.domain) else {
                return;
            };
            message.add_key(location);
            message.add_key(domain);
            if let Some(content_keys) = &self.content_keys {
                message.add_key_collection(KeyCollection::from_content(
                    location,
                    domain,
                    self.version,
                    content_keys.iter().copied(),
                ));
            } else {
                message.add_integer(self.return_nr);
                if self.key_filter.is_some() || self.content_filter.is_some() {
                    message.add_bloom_filter(self.key_filter.clone());
                    message.add_bloom_filter(self.content_filter.clone());
                }
            }
        }
    }
}

macro_rules! query_setters {
    () => {
        /// Scans the whole `(location, domain)` bucket.
        pub fn bucket(mut self, location: Key160, domain: Key160) -> Self {
            self.query.location = Some(location);
            self.query.domain = Some(domain);
            self
        }

        /// Queries exactly these keys.
        pub fn keys(mut self, keys: impl IntoIterator<Item = Key640>) -> Self {
            self.query.keys = Some(keys.into_iter().collect());
            self
        }

        /// Queries these content keys inside the bucket.
        pub fn content_keys(mut self, keys: impl IntoIterator<Item = Key160>) -> Self {
            self.query.content_keys = Some(keys.into_iter().collect());
            self
        }

        /// Queries the inclusive key range `[from, to]`.
        pub fn range(mut self, from: Key640, to: Key640) -> Self {
            self.query.range = Some((from, to));
            self
        }

        /// Sets the version key used with [`content_keys`](Self::content_keys).
        pub fn version(mut self, version: Key160) -> Self {
            self.query.version = version;
            self
        }

        /// Caps the result count; negative means unlimited.
        pub fn limit(mut self, limit: i32) -> Self {
            self.query.return_nr = limit;
            self
        }

        /// Scans in descending key order.
        pub fn descending(mut self) -> Self {
            self.query.ascending = false;
            self
        }

        /// Pre-filters entries by content key.
        pub fn key_filter(mut self, filter: KeyBloomFilter) -> Self {
            self.query.key_filter = Some(filter);
            self
        }

        /// Pre-filters entries by payload hash.
        pub fn content_filter(mut self, filter: KeyBloomFilter) -> Self {
            self.query.content_filter = Some(filter);
            self
        }

        /// Attach the public key and sign the message.
        pub fn sign_message(mut self) -> Self {
            self.sign_message = true;
            self
        }

        /// Ask the peer to sign its response.
        pub fn sign_response(mut self) -> Self {
            self.sign_response = true;
            self
        }

        /// Send over UDP instead of the default TCP.
        pub fn force_udp(mut self) -> Self {
            self.force_udp = true;
            self
        }

        pub(crate) fn is_force_udp(&self) -> bool {
            self.force_udp
        }
    };
}

/// Builder for GET: read entries by collection, range, or bucket.
#[derive(Debug, Clone, Default)]
pub struct GetBuilder {
    query: QueryParams,
    sign_message: bool,
    sign_response: bool,
    force_udp: bool,
}

impl GetBuilder {
    /// Starts an empty GET; give it a shape with
    /// [`bucket`](Self::bucket), [`keys`](Self::keys), or
    /// [`range`](Self::range).
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the return-bloom request variant. GET servers ignore it;
    /// it exists so a GET can be replayed as the matching DIGEST.
    pub fn return_bloom_filter(mut self) -> Self {
        self.query.return_bloom = true;
        self
    }

    query_setters!();

    pub(crate) fn build_request(
        &self,
        id: u64,
        sender: Key160,
        recipient: Key160,
        signing_key: &SigningKey,
    ) -> Result<Message, RpcError> {
        self.query.validate()?;
        let mut message = Message::request(
            id,
            Command::Get,
            self.query.semantics().to_type(),
            sender,
            recipient,
        );
        if self.sign_response {
            message.set_wants_signed_response(true);
        }
        self.query.populate(&mut message);
        if self.sign_message {
            message.sign(signing_key);
        }
        Ok(message)
    }
}

/// Builder for DIGEST: summarize entries instead of fetching them.
#[derive(Debug, Clone, Default)]
pub struct DigestBuilder {
    query: QueryParams,
    sign_message: bool,
    sign_response: bool,
    force_udp: bool,
}

impl DigestBuilder {
    /// Starts an empty DIGEST; shape it like a [`GetBuilder`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Summarize the match set as bloom filters instead of an exact
    /// key map.
    pub fn return_bloom_filter(mut self) -> Self {
        self.query.return_bloom = true;
        self
    }

    pub(crate) fn wants_bloom(&self) -> bool {
        self.query.return_bloom
    }

    query_setters!();

    pub(crate) fn build_request(
        &self,
        id: u64,
        sender: Key160,
        recipient: Key160,
        signing_key: &SigningKey,
    ) -> Result<Message, RpcError> {
        self.query.validate()?;
        let mut message = Message::request(
            id,
            Command::Digest,
            self.query.semantics().to_type(),
            sender,
            recipient,
        );
        if self.sign_response {
            message.set_wants_signed_response(true);
        }
        self.query.populate(&mut message);
        if self.sign_message {
            message.sign(signing_key);
        }
        Ok(message)
    }
}

/// Builder for REMOVE: delete entries, optionally echoing them back.
#[derive(Debug, Clone)]
pub struct RemoveBuilder {
    location: Option<Key160>,
    domain: Option<Key160>,
    version: Key160,
    content_keys: Option<Vec<Key160>>,
    keys: Option<Vec<Key640>>,
    return_results: bool,
    sign_message: bool,
    sign_response: bool,
    force_udp: bool,
}

impl Default for RemoveBuilder {
    fn default() -> Self {
        Self {
            location: None,
            domain: None,
            version: Key160::ZERO,
            content_keys: None,
            keys: None,
            return_results: false,
            sign_message: false,
            sign_response: false,
            force_udp: false,
        }
    }
}

impl RemoveBuilder {
    /// Starts an empty REMOVE; target it with
    /// [`bucket`](Self::bucket) or [`keys`](Self::keys).
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes from the whole `(location, domain)` bucket.
    pub fn bucket(mut self, location: Key160, domain: Key160) -> Self {
        self.location = Some(location);
        self.domain = Some(domain);
        self
    }

    /// Removes exactly these keys.
    pub fn keys(mut self, keys: impl IntoIterator<Item = Key640>) -> Self {
        self.keys = Some(keys.into_iter().collect());
        self
    }

    /// Removes these content keys inside the bucket.
    pub fn content_keys(mut self, keys: impl IntoIterator<Item = Key160>) -> Self {
        self.content_keys = Some(keys.into_iter().collect());
        self
    }

    /// Sets the version key used with [`content_keys`](Self::content_keys).
    pub fn version(mut self, version: Key160) -> Self {
        self.version = version;
        self
    }

    /// Echo the removed entries in the response.
    pub fn return_results(mut self) -> Self {
        self.return_results = true;
        self
    }

    pub(crate) fn wants_results(&self) -> bool {
        self.return_results
    }

    /// Attach the public key and sign the message; required to remove
    /// protected entries.
    pub fn sign_message(mut self) -> Self {
        self.sign_message = true;
        self
    }

    /// Ask the peer to sign its response.
    pub fn sign_response(mut self) -> Self {
        self.sign_response = true;
        self
    }

    /// Send over UDP instead of the default TCP.
    pub fn force_udp(mut self) -> Self {
        self.force_udp = true;
        self
    }

    pub(crate) fn is_force_udp(&self) -> bool {
        self.force_udp
    }

    pub(crate) fn build_request(
        &self,
        id: u64,
        sender: Key160,
        recipient: Key160,
        signing_key: &SigningKey,
    ) -> Result<Message, RpcError> {
        if self.keys.is_none() && (self.location.is_none() || self.domain.is_none()) {
            return Err(RpcError::malformed(
                "REMOVE needs a key collection or location and domain",
            ));
        }

        let sem = RemoveSemantics {
            echo_results: self.return_results,
        };
        let mut message = Message::request(id, Command::Remove, sem.to_type(), sender, recipient);
        if self.sign_response {
            message.set_wants_signed_response(true);
        }

        if let Some(keys) = &self.keys {
            message.add_key_collection(KeyCollection::new(keys.iter().copied()));
        } else {
            // Checked above.
            let (Some(location), Some(domain)) = (self.location, self.domain) else {
                return Err(RpcError::malformed("REMOVE bucket incomplete"));
            };
            message.add_key(location);
            message.add_key(domain);
            if let Some(content_keys) = &self.content_keys {
                message.add_key_collection(KeyCollection::from_content(
                    location,
                    domain,
                    self.version,
                    content_keys.iter().copied(),
                ));
            }
        }
        if self.sign_message {
            message.sign(signing_key);
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stash_proto::MessageType;

    fn k(b: u8) -> Key160 {
        let mut bytes = [0u8; 20];
        bytes[19] = b;
        Key160::new(bytes)
    }

    #[test]
    fn test_put_variant_selection() {
        let key = SigningKey::random();
        let plain = PutBuilder::new(k(1), k(2))
            .data(k(3), Data::new(&b"A"[..]))
            .build_request(1, k(0xA), k(0xB), &key)
            .unwrap();
        assert_eq!(plain.message_type(), MessageType::Request1);
        assert!(!plain.is_signed());

        let protected = PutBuilder::new(k(1), k(2))
            .data(k(3), Data::new(&b"A"[..]))
            .put_if_absent()
            .protect_domain()
            .build_request(2, k(0xA), k(0xB), &key)
            .unwrap();
        assert_eq!(protected.message_type(), MessageType::Request4);
        // Domain protection needs the public key on the wire.
        assert!(protected.is_signed());
    }

    #[test]
    fn test_put_without_data_is_rejected() {
        let key = SigningKey::random();
        let err = PutBuilder::new(k(1), k(2))
            .build_request(1, k(0xA), k(0xB), &key)
            .unwrap_err();
        assert!(matches!(err, RpcError::Malformed(_)));
    }

    #[test]
    fn test_add_hashed_mode_collapses_duplicates() {
        let key = SigningKey::random();
        let message = AddBuilder::new(k(1), k(2))
            .data(Data::new(&b"same"[..]))
            .data(Data::new(&b"same"[..]))
            .data(Data::new(&b"other"[..]))
            .build_request(1, k(0xA), k(0xB), &key)
            .unwrap();
        assert_eq!(message.data_map(0).unwrap().len(), 2);
    }

    #[test]
    fn test_add_list_mode_keeps_duplicates() {
        let key = SigningKey::random();
        let message = AddBuilder::new(k(1), k(2))
            .data(Data::new(&b"same"[..]))
            .data(Data::new(&b"same"[..]))
            .list()
            .build_request(1, k(0xA), k(0xB), &key)
            .unwrap();
        assert_eq!(message.message_type(), MessageType::Request3);
        assert_eq!(message.data_map(0).unwrap().len(), 2);
    }

    #[test]
    fn test_get_range_lowering() {
        let key = SigningKey::random();
        let from = Key640::new(k(1), k(2), k(0x10), Key160::ZERO);
        let to = Key640::new(k(1), k(2), k(0x40), Key160::ZERO);
        let message = GetBuilder::new()
            .range(from, to)
            .limit(2)
            .descending()
            .build_request(1, k(0xA), k(0xB), &key)
            .unwrap();

        assert_eq!(message.message_type(), MessageType::Request3);
        assert_eq!(message.integer(0), Some(2));
        let coll = message.key_collection(0).unwrap();
        assert_eq!(coll.keys(), &[from, to]);
    }

    #[test]
    fn test_get_bucket_lowering_sets_limit_slot() {
        let key = SigningKey::random();
        let message = GetBuilder::new()
            .bucket(k(1), k(2))
            .build_request(1, k(0xA), k(0xB), &key)
            .unwrap();
        assert_eq!(message.key(0), Some(k(1)));
        assert_eq!(message.key(1), Some(k(2)));
        assert_eq!(message.integer(0), Some(-1));
        assert!(message.key_collection(0).is_none());
    }

    #[test]
    fn test_get_content_keys_lowering_omits_integer() {
        let key = SigningKey::random();
        let message = GetBuilder::new()
            .bucket(k(1), k(2))
            .content_keys([k(7), k(8)])
            .build_request(1, k(0xA), k(0xB), &key)
            .unwrap();
        // Collection present, integer absent: the explicit-keys shape.
        assert!(message.key_collection(0).is_some());
        assert_eq!(message.integer(0), None);
    }

    #[test]
    fn test_content_filter_lands_in_second_slot() {
        let key = SigningKey::random();
        let factory = stash_proto::BloomFilterFactory::default();
        let filter = factory.create_from([k(9)].iter());
        let message = GetBuilder::new()
            .bucket(k(1), k(2))
            .content_filter(filter.clone())
            .build_request(1, k(0xA), k(0xB), &key)
            .unwrap();

        assert!(message.bloom_filter(0).is_none());
        assert_eq!(message.bloom_filter(1), Some(&filter));
    }

    #[test]
    fn test_collection_and_range_are_exclusive() {
        let key = SigningKey::random();
        let some_key = Key640::new(k(1), k(2), k(3), Key160::ZERO);
        let err = GetBuilder::new()
            .keys([some_key])
            .range(some_key, some_key)
            .build_request(1, k(0xA), k(0xB), &key)
            .unwrap_err();
        assert!(matches!(err, RpcError::Malformed(_)));
    }

    #[test]
    fn test_query_without_target_is_rejected() {
        let key = SigningKey::random();
        assert!(GetBuilder::new().build_request(1, k(0xA), k(0xB), &key).is_err());
        assert!(DigestBuilder::new()
            .build_request(1, k(0xA), k(0xB), &key)
            .is_err());
        assert!(RemoveBuilder::new()
            .build_request(1, k(0xA), k(0xB), &key)
            .is_err());
    }

    #[test]
    fn test_sign_response_flag_lowering() {
        let key = SigningKey::random();
        let message = GetBuilder::new()
            .bucket(k(1), k(2))
            .sign_response()
            .build_request(1, k(0xA), k(0xB), &key)
            .unwrap();
        assert!(message.wants_signed_response());

        // When the request itself is signed, the flag sits inside the
        // signed header.
        let signed = PutBuilder::new(k(1), k(2))
            .data(k(3), Data::new(&b"A"[..]))
            .sign_response()
            .sign_message()
            .build_request(2, k(0xA), k(0xB), &key)
            .unwrap();
        assert!(signed.wants_signed_response());
        signed.verify_signature().unwrap();
    }

    #[test]
    fn test_remove_echo_variant() {
        let key = SigningKey::random();
        let message = RemoveBuilder::new()
            .bucket(k(1), k(2))
            .return_results()
            .build_request(1, k(0xA), k(0xB), &key)
            .unwrap();
        assert_eq!(message.message_type(), MessageType::Request2);
    }

    #[test]
    fn test_digest_bloom_variant() {
        let key = SigningKey::random();
        let message = DigestBuilder::new()
            .bucket(k(1), k(2))
            .return_bloom_filter()
            .descending()
            .build_request(1, k(0xA), k(0xB), &key)
            .unwrap();
        assert_eq!(message.message_type(), MessageType::Request4);
    }
}
