//! Client-side dispatch.
//!
//! [`StorageClient`] lowers a builder to a message, hands it to the
//! transport (TCP unless the builder forces UDP), and decodes the
//! response into a typed result. The client is cheap to clone; fan-out
//! operations clone it into their per-peer tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use stash_core::{Key160, Key480, Key640, SigningKey};
use stash_net::{ChannelMode, PeerAddress, Transport};
use stash_proto::{DataMap, KeyBloomFilter, KeyMap640, KeyMapByte, Message, MessageType};
use stash_store::PutStatus;
use tracing::debug;

use crate::builder::{AddBuilder, DigestBuilder, GetBuilder, PutBuilder, RemoveBuilder};
use crate::future::{PutFuture, RoutingOutcome};
use crate::RpcError;

/// The outcome of one PUT or ADD against one peer.
#[derive(Debug, Clone)]
pub struct PutResult {
    /// Per-entry status bytes, in request order
    pub statuses: KeyMapByte,
    /// Whether the peer marked the response PARTIALLY_OK
    pub partial: bool,
}

impl PutResult {
    /// The keys the peer actually stored, as version-free keys.
    pub fn acknowledged(&self) -> Vec<Key480> {
        self.statuses
            .iter()
            .filter(|(_, status)| *status == PutStatus::Ok.ordinal())
            .map(|(key, _)| key.key480())
            .collect()
    }

    /// True when every entry stored.
    pub fn all_ok(&self) -> bool {
        !self.partial && self.statuses.all_equal(PutStatus::Ok.ordinal())
    }
}

/// The outcome of one REMOVE against one peer.
#[derive(Debug, Clone)]
pub struct RemoveResult {
    /// The keys that were actually removed
    pub keys: Vec<Key640>,
    /// The removed entries, when the builder asked for the echo
    pub data: Option<DataMap>,
}

/// The outcome of one DIGEST against one peer.
#[derive(Debug, Clone, Default)]
pub struct DigestResult {
    /// Exact key → digest map (non-bloom responses)
    pub digests: Option<KeyMap640>,
    /// Location-key summary, only on unpinned bloom responses
    pub location_filter: Option<KeyBloomFilter>,
    /// Domain-key summary, only on unpinned bloom responses
    pub domain_filter: Option<KeyBloomFilter>,
    /// Content-key summary (bloom responses)
    pub content_filter: Option<KeyBloomFilter>,
    /// Version-key summary (bloom responses)
    pub version_filter: Option<KeyBloomFilter>,
}

/// Client half of the storage RPC.
#[derive(Clone)]
pub struct StorageClient {
    transport: Arc<dyn Transport>,
    signing_key: Arc<SigningKey>,
    local_id: Key160,
    next_id: Arc<AtomicU64>,
}

impl StorageClient {
    /// Creates a client dispatching through `transport` and signing
    /// with `signing_key` where builders ask for it.
    pub fn new(local_id: Key160, signing_key: SigningKey, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            signing_key: Arc::new(signing_key),
            local_id,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// This peer's id.
    pub fn local_id(&self) -> Key160 {
        self.local_id
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends a lowered request and checks the response frame: signature
    /// (when present, and required when the request demanded one), then
    /// the response type.
    async fn exchange(
        &self,
        peer: &PeerAddress,
        message: Message,
        force_udp: bool,
    ) -> Result<Message, RpcError> {
        let mode = if force_udp {
            ChannelMode::Udp
        } else {
            ChannelMode::Tcp
        };
        let wants_signed = message.wants_signed_response();
        let response = self.transport.request(peer, message, mode).await?;
        response.verify_signature()?;
        if wants_signed && !response.is_signed() {
            return Err(RpcError::UnexpectedResponse(
                "peer did not sign the response as requested".into(),
            ));
        }
        match response.message_type() {
            MessageType::Ok | MessageType::PartiallyOk => Ok(response),
            MessageType::Denied => Err(RpcError::Denied),
            MessageType::Exception => Err(RpcError::RemoteException),
            other => Err(RpcError::UnexpectedResponse(format!(
                "{other:?} is not a response type"
            ))),
        }
    }

    /// Stores entries on `peer`.
    pub async fn put(&self, peer: &PeerAddress, builder: &PutBuilder) -> Result<PutResult, RpcError> {
        let message =
            builder.build_request(self.next_id(), self.local_id, peer.id, &self.signing_key)?;
        let response = self.exchange(peer, message, builder.is_force_udp()).await?;

        let statuses = response
            .key_map_byte(0)
            .cloned()
            .ok_or(RpcError::MissingSlot("status map"))?;
        Ok(PutResult {
            partial: response.message_type() == MessageType::PartiallyOk,
            statuses,
        })
    }

    /// Adds entries on `peer` (create-only semantics).
    pub async fn add(&self, peer: &PeerAddress, builder: &AddBuilder) -> Result<PutResult, RpcError> {
        let message =
            builder.build_request(self.next_id(), self.local_id, peer.id, &self.signing_key)?;
        let response = self.exchange(peer, message, builder.is_force_udp()).await?;

        let statuses = response
            .key_map_byte(0)
            .cloned()
            .ok_or(RpcError::MissingSlot("status map"))?;
        Ok(PutResult {
            partial: !statuses.all_equal(PutStatus::Ok.ordinal()),
            statuses,
        })
    }

    /// Reads entries from `peer`.
    pub async fn get(&self, peer: &PeerAddress, builder: &GetBuilder) -> Result<DataMap, RpcError> {
        let message =
            builder.build_request(self.next_id(), self.local_id, peer.id, &self.signing_key)?;
        let response = self.exchange(peer, message, builder.is_force_udp()).await?;
        response
            .data_map(0)
            .cloned()
            .ok_or(RpcError::MissingSlot("data map"))
    }

    /// Removes entries on `peer`.
    pub async fn remove(
        &self,
        peer: &PeerAddress,
        builder: &RemoveBuilder,
    ) -> Result<RemoveResult, RpcError> {
        let message =
            builder.build_request(self.next_id(), self.local_id, peer.id, &self.signing_key)?;
        let response = self.exchange(peer, message, builder.is_force_udp()).await?;

        if builder.wants_results() {
            let data = response
                .data_map(0)
                .cloned()
                .ok_or(RpcError::MissingSlot("data map"))?;
            Ok(RemoveResult {
                keys: data.keys().copied().collect(),
                data: Some(data),
            })
        } else {
            let keys = response
                .key_collection(0)
                .ok_or(RpcError::MissingSlot("key collection"))?;
            Ok(RemoveResult {
                keys: keys.keys().to_vec(),
                data: None,
            })
        }
    }

    /// Summarizes entries on `peer`.
    pub async fn digest(
        &self,
        peer: &PeerAddress,
        builder: &DigestBuilder,
    ) -> Result<DigestResult, RpcError> {
        let message =
            builder.build_request(self.next_id(), self.local_id, peer.id, &self.signing_key)?;
        let response = self.exchange(peer, message, builder.is_force_udp()).await?;

        if !builder.wants_bloom() {
            let digests = response
                .key_map_640(0)
                .cloned()
                .ok_or(RpcError::MissingSlot("digest map"))?;
            return Ok(DigestResult {
                digests: Some(digests),
                ..Default::default()
            });
        }

        match response.bloom_filter_count() {
            2 => Ok(DigestResult {
                content_filter: response.bloom_filter(0).cloned(),
                version_filter: response.bloom_filter(1).cloned(),
                ..Default::default()
            }),
            4 => Ok(DigestResult {
                location_filter: response.bloom_filter(0).cloned(),
                domain_filter: response.bloom_filter(1).cloned(),
                content_filter: response.bloom_filter(2).cloned(),
                version_filter: response.bloom_filter(3).cloned(),
                ..Default::default()
            }),
            count => Err(RpcError::UnexpectedResponse(format!(
                "digest bloom response carries {count} filters, expected 2 or 4"
            ))),
        }
    }

    /// Fans one PUT out to every peer the routing step surfaced and
    /// returns the aggregate tracking it. The operation succeeds once at
    /// least `min` peers acknowledge.
    pub fn put_fanout(&self, routing: RoutingOutcome, builder: PutBuilder, min: usize) -> PutFuture {
        debug!(
            peers = routing.peers().len(),
            min, "starting put fan-out"
        );
        PutFuture::spawn(self.clone(), routing, builder, min)
    }
}
