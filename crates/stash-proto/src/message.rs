//! The slotted storage message and its codec.
//!
//! One message type serves requests and responses. A fixed header names
//! the command, the request/response type, and the two peers; the body is
//! a set of typed slots of which each operation populates a subset. Slot
//! indices are stable: handlers read `key[0]`/`key[1]` as location and
//! domain, `bloom_filter[0]`/`bloom_filter[1]` as key and content filter,
//! and so on.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use stash_core::{
    CanonicalDecode, CanonicalEncode, DecodeError, Key160, PublicKey, Signature, SignatureError,
    SigningKey,
};
use thiserror::Error;

use crate::bloom::KeyBloomFilter;
use crate::data::{DataMap, KeyCollection, KeyMap640, KeyMapByte};

/// Maximum number of values per slot family.
pub const MAX_SLOTS: usize = 4;

/// Message-level protocol errors.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Codec failure.
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),

    /// A signature slot is present without its public key.
    #[error("signature present without public key")]
    MissingPublicKey,

    /// Signature verification failed.
    #[error("message signature invalid: {0}")]
    BadSignature(#[from] SignatureError),
}

/// The five storage commands. Opcodes are wire-visible and frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Store entries, overwrite allowed per variant
    Put,
    /// Read entries
    Get,
    /// Store entries keyed by content hash or random key
    Add,
    /// Delete entries
    Remove,
    /// Summarize entries
    Digest,
}

impl Command {
    /// The wire opcode.
    pub const fn opcode(&self) -> u8 {
        match self {
            Command::Put => 1,
            Command::Get => 2,
            Command::Add => 3,
            Command::Remove => 4,
            Command::Digest => 11,
        }
    }

    /// Decodes a wire opcode.
    pub fn from_opcode(opcode: u8) -> Result<Self, DecodeError> {
        match opcode {
            1 => Ok(Command::Put),
            2 => Ok(Command::Get),
            3 => Ok(Command::Add),
            4 => Ok(Command::Remove),
            11 => Ok(Command::Digest),
            other => Err(DecodeError::UnknownTag(u32::from(other))),
        }
    }
}

impl CanonicalEncode for Command {
    fn encode(&self, buf: &mut BytesMut) {
        self.opcode().encode(buf);
    }
}

impl CanonicalDecode for Command {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Self::from_opcode(u8::decode(buf)?)
    }
}

/// Request variants and response types, one header byte.
///
/// `Request1..Request4` encode two command-specific booleans; the
/// response types mark how the operation concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// First request variant
    Request1,
    /// Second request variant
    Request2,
    /// Third request variant
    Request3,
    /// Fourth request variant
    Request4,
    /// Every part of the operation succeeded
    Ok,
    /// Some entries failed; per-entry status tells which
    PartiallyOk,
    /// The peer refused the request
    Denied,
    /// The request could not be decoded or executed
    Exception,
}

impl MessageType {
    /// The wire tag.
    pub const fn tag(&self) -> u8 {
        match self {
            MessageType::Request1 => 1,
            MessageType::Request2 => 2,
            MessageType::Request3 => 3,
            MessageType::Request4 => 4,
            MessageType::Ok => 5,
            MessageType::PartiallyOk => 6,
            MessageType::Denied => 7,
            MessageType::Exception => 8,
        }
    }

    /// Decodes a wire tag.
    pub fn from_tag(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            1 => Ok(MessageType::Request1),
            2 => Ok(MessageType::Request2),
            3 => Ok(MessageType::Request3),
            4 => Ok(MessageType::Request4),
            5 => Ok(MessageType::Ok),
            6 => Ok(MessageType::PartiallyOk),
            7 => Ok(MessageType::Denied),
            8 => Ok(MessageType::Exception),
            other => Err(DecodeError::UnknownTag(u32::from(other))),
        }
    }

    /// True for `Request1..Request4`.
    pub const fn is_request(&self) -> bool {
        matches!(
            self,
            MessageType::Request1
                | MessageType::Request2
                | MessageType::Request3
                | MessageType::Request4
        )
    }
}

impl CanonicalEncode for MessageType {
    fn encode(&self, buf: &mut BytesMut) {
        self.tag().encode(buf);
    }
}

impl CanonicalDecode for MessageType {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Self::from_tag(u8::decode(buf)?)
    }
}

/// A storage request or response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation id, echoed by the response
    id: u64,
    /// Command opcode
    command: Command,
    /// Request variant or response type
    mtype: MessageType,
    /// Ask the responder to sign its response
    sign_response: bool,
    /// Peer id of the sender
    sender: Key160,
    /// Peer id of the intended recipient
    recipient: Key160,

    keys: Vec<Key160>,
    key_collections: Vec<KeyCollection>,
    integers: Vec<i32>,
    /// Positional slots; an absent filter leaves a hole so the slots
    /// after it keep their meaning
    bloom_filters: Vec<Option<KeyBloomFilter>>,
    data_maps: Vec<DataMap>,
    key_map_bytes: Vec<KeyMapByte>,
    key_maps_640: Vec<KeyMap640>,

    public_key: Option<PublicKey>,
    signature: Option<Signature>,
}

impl Message {
    /// Creates a request message.
    pub fn request(
        id: u64,
        command: Command,
        mtype: MessageType,
        sender: Key160,
        recipient: Key160,
    ) -> Self {
        Self {
            id,
            command,
            mtype,
            sign_response: false,
            sender,
            recipient,
            keys: Vec::new(),
            key_collections: Vec::new(),
            integers: Vec::new(),
            bloom_filters: Vec::new(),
            data_maps: Vec::new(),
            key_map_bytes: Vec::new(),
            key_maps_640: Vec::new(),
            public_key: None,
            signature: None,
        }
    }

    /// Creates the response skeleton for a request: same id and command,
    /// peers swapped.
    pub fn response_to(request: &Message, mtype: MessageType) -> Self {
        Self::request(
            request.id,
            request.command,
            mtype,
            request.recipient,
            request.sender,
        )
    }

    /// Correlation id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Command opcode.
    pub fn command(&self) -> Command {
        self.command
    }

    /// Request variant or response type.
    pub fn message_type(&self) -> MessageType {
        self.mtype
    }

    /// Replaces the message type.
    pub fn set_message_type(&mut self, mtype: MessageType) {
        self.mtype = mtype;
    }

    /// Sender peer id.
    pub fn sender(&self) -> Key160 {
        self.sender
    }

    /// Recipient peer id.
    pub fn recipient(&self) -> Key160 {
        self.recipient
    }

    /// Whether the requester asked for a signed response.
    pub fn wants_signed_response(&self) -> bool {
        self.sign_response
    }

    /// Asks the responder to sign its response.
    pub fn set_wants_signed_response(&mut self, sign: bool) {
        self.sign_response = sign;
    }

    /// Appends a bare key slot.
    pub fn add_key(&mut self, key: Key160) {
        self.keys.push(key);
    }

    /// Reads a bare key slot.
    pub fn key(&self, index: usize) -> Option<Key160> {
        self.keys.get(index).copied()
    }

    /// Appends a key collection slot.
    pub fn add_key_collection(&mut self, collection: KeyCollection) {
        self.key_collections.push(collection);
    }

    /// Reads a key collection slot.
    pub fn key_collection(&self, index: usize) -> Option<&KeyCollection> {
        self.key_collections.get(index)
    }

    /// Appends an integer slot.
    pub fn add_integer(&mut self, value: i32) {
        self.integers.push(value);
    }

    /// Reads an integer slot.
    pub fn integer(&self, index: usize) -> Option<i32> {
        self.integers.get(index).copied()
    }

    /// Appends a bloom filter slot. Pass `None` to leave a positional
    /// hole (e.g. a content filter without a key filter).
    pub fn add_bloom_filter(&mut self, filter: Option<KeyBloomFilter>) {
        self.bloom_filters.push(filter);
    }

    /// Reads a bloom filter slot; holes read as absent.
    pub fn bloom_filter(&self, index: usize) -> Option<&KeyBloomFilter> {
        self.bloom_filters.get(index).and_then(|slot| slot.as_ref())
    }

    /// Number of populated (non-hole) bloom filter slots.
    pub fn bloom_filter_count(&self) -> usize {
        self.bloom_filters.iter().filter(|slot| slot.is_some()).count()
    }

    /// Appends a data map slot.
    pub fn add_data_map(&mut self, map: DataMap) {
        self.data_maps.push(map);
    }

    /// Reads a data map slot.
    pub fn data_map(&self, index: usize) -> Option<&DataMap> {
        self.data_maps.get(index)
    }

    /// Appends a status map slot.
    pub fn add_key_map_byte(&mut self, map: KeyMapByte) {
        self.key_map_bytes.push(map);
    }

    /// Reads a status map slot.
    pub fn key_map_byte(&self, index: usize) -> Option<&KeyMapByte> {
        self.key_map_bytes.get(index)
    }

    /// Appends a digest map slot.
    pub fn add_key_map_640(&mut self, map: KeyMap640) {
        self.key_maps_640.push(map);
    }

    /// Reads a digest map slot.
    pub fn key_map_640(&self, index: usize) -> Option<&KeyMap640> {
        self.key_maps_640.get(index)
    }

    /// The attached public key, if any.
    pub fn public_key(&self) -> Option<&PublicKey> {
        self.public_key.as_ref()
    }

    /// The attached signature, if any.
    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    /// True when both the public key and signature slots are populated.
    pub fn is_signed(&self) -> bool {
        self.public_key.is_some() && self.signature.is_some()
    }

    /// Attaches the sender's public key and signs the message.
    ///
    /// Everything but the signature slot itself is covered, so slots must
    /// be populated before signing.
    pub fn sign(&mut self, key: &SigningKey) {
        self.public_key = Some(key.public_key());
        let payload = self.signable_bytes();
        self.signature = Some(key.sign(&payload));
    }

    /// Checks the attached signature against the attached public key.
    ///
    /// An unsigned message verifies trivially; a signature without a
    /// public key is malformed.
    pub fn verify_signature(&self) -> Result<(), ProtoError> {
        let Some(signature) = &self.signature else {
            return Ok(());
        };
        let public_key = self.public_key.ok_or(ProtoError::MissingPublicKey)?;
        let payload = self.signable_bytes();
        public_key.verify(&payload, signature)?;
        Ok(())
    }

    fn signable_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.encode_body(&mut buf);
        buf.to_vec()
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        self.id.encode(buf);
        self.command.encode(buf);
        self.mtype.encode(buf);
        self.sign_response.encode(buf);
        self.sender.encode(buf);
        self.recipient.encode(buf);
        self.keys.encode(buf);
        self.key_collections.encode(buf);
        self.integers.encode(buf);
        self.bloom_filters.encode(buf);
        self.data_maps.encode(buf);
        self.key_map_bytes.encode(buf);
        self.key_maps_640.encode(buf);
        self.public_key.encode(buf);
    }
}

fn check_slot_count(len: usize) -> Result<(), DecodeError> {
    if len > MAX_SLOTS {
        return Err(DecodeError::Invalid(format!(
            "slot family holds {len} values, limit is {MAX_SLOTS}"
        )));
    }
    Ok(())
}

impl CanonicalEncode for Message {
    fn encode(&self, buf: &mut BytesMut) {
        self.encode_body(buf);
        self.signature.encode(buf);
    }
}

impl CanonicalDecode for Message {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let id = u64::decode(buf)?;
        let command = Command::decode(buf)?;
        let mtype = MessageType::decode(buf)?;
        let sign_response = bool::decode(buf)?;
        let sender = Key160::decode(buf)?;
        let recipient = Key160::decode(buf)?;
        let keys = Vec::<Key160>::decode(buf)?;
        let key_collections = Vec::<KeyCollection>::decode(buf)?;
        let integers = Vec::<i32>::decode(buf)?;
        let bloom_filters = Vec::<Option<KeyBloomFilter>>::decode(buf)?;
        let data_maps = Vec::<DataMap>::decode(buf)?;
        let key_map_bytes = Vec::<KeyMapByte>::decode(buf)?;
        let key_maps_640 = Vec::<KeyMap640>::decode(buf)?;
        let public_key = Option::<PublicKey>::decode(buf)?;
        let signature = Option::<Signature>::decode(buf)?;

        for len in [
            keys.len(),
            key_collections.len(),
            integers.len(),
            bloom_filters.len(),
            data_maps.len(),
            key_map_bytes.len(),
            key_maps_640.len(),
        ] {
            check_slot_count(len)?;
        }

        Ok(Self {
            id,
            command,
            mtype,
            sign_response,
            sender,
            recipient,
            keys,
            key_collections,
            integers,
            bloom_filters,
            data_maps,
            key_map_bytes,
            key_maps_640,
            public_key,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Data;
    use stash_core::Key640;

    fn k(b: u8) -> Key160 {
        let mut bytes = [0u8; 20];
        bytes[19] = b;
        Key160::new(bytes)
    }

    fn sample_request() -> Message {
        let mut msg = Message::request(77, Command::Put, MessageType::Request1, k(0xAA), k(0xBB));
        let mut map = DataMap::new();
        map.insert(
            Key640::new(k(1), k(2), k(3), Key160::ZERO),
            Data::new(&b"A"[..]),
        );
        msg.add_data_map(map);
        msg
    }

    #[test]
    fn test_opcodes_are_frozen() {
        assert_eq!(Command::Put.opcode(), 1);
        assert_eq!(Command::Get.opcode(), 2);
        assert_eq!(Command::Add.opcode(), 3);
        assert_eq!(Command::Remove.opcode(), 4);
        assert_eq!(Command::Digest.opcode(), 11);
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        assert!(Command::from_opcode(5).is_err());
        assert!(Command::from_opcode(0).is_err());
    }

    #[test]
    fn test_message_roundtrip() {
        let msg = sample_request();
        let decoded = Message::from_bytes(&msg.to_vec()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_sign_and_verify() {
        let key = SigningKey::random();
        let mut msg = sample_request();
        msg.sign(&key);

        let decoded = Message::from_bytes(&msg.to_vec()).unwrap();
        assert!(decoded.is_signed());
        decoded.verify_signature().unwrap();
    }

    #[test]
    fn test_tampered_message_fails_verification() {
        let key = SigningKey::random();
        let mut msg = sample_request();
        msg.sign(&key);

        // Mutate a slot after signing.
        msg.add_integer(9);
        assert!(msg.verify_signature().is_err());
    }

    #[test]
    fn test_response_swaps_peers_and_keeps_id() {
        let request = sample_request();
        let response = Message::response_to(&request, MessageType::Ok);
        assert_eq!(response.id(), request.id());
        assert_eq!(response.command(), request.command());
        assert_eq!(response.sender(), request.recipient());
        assert_eq!(response.recipient(), request.sender());
    }

    #[test]
    fn test_unsigned_message_verifies_trivially() {
        sample_request().verify_signature().unwrap();
    }
}
