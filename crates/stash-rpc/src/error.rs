//! RPC error taxonomy.
//!
//! Malformed requests never touch the store and answer with an
//! EXCEPTION response; access-control denials are per-entry status and
//! never message-level errors; transport failures only ever surface on
//! the client side.

use stash_core::DecodeError;
use stash_net::TransportError;
use stash_proto::ProtoError;
use thiserror::Error;

/// Errors of the storage RPC core.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Canonical decoding failed.
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),

    /// Message-level protocol violation (bad signature, missing key).
    #[error("protocol: {0}")]
    Proto(#[from] ProtoError),

    /// A request or builder carries an illegal slot combination or
    /// misses a required field.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The transport could not complete the exchange.
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// The peer answered DENIED.
    #[error("peer denied the request")]
    Denied,

    /// The peer answered EXCEPTION.
    #[error("peer reported an exception")]
    RemoteException,

    /// The response is missing a slot the operation requires.
    #[error("response is missing the {0} slot")]
    MissingSlot(&'static str),

    /// The response shape does not match the request.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl RpcError {
    /// Shorthand for a malformed-request error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        RpcError::Malformed(reason.into())
    }
}
