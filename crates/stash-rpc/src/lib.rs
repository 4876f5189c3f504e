//! Stash RPC - The storage request/response core.
//!
//! Server side: [`StorageRpc`] decodes the five storage commands
//! (PUT, GET, ADD, REMOVE, DIGEST) into behaviors against an
//! [`EntryStore`](stash_store::EntryStore) and reports per-entry status.
//!
//! Client side: the builders carry user intent, [`StorageClient`] lowers
//! them to wire messages and dispatches through a
//! [`Transport`](stash_net::Transport), and [`PutFuture`] aggregates the
//! fan-out of one logical store operation over several peers.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod builder;
pub mod client;
pub mod error;
pub mod future;
pub mod semantics;
pub mod server;

pub use builder::{AddBuilder, DigestBuilder, GetBuilder, PutBuilder, RemoveBuilder};
pub use client::{DigestResult, PutResult, RemoveResult, StorageClient};
pub use error::RpcError;
pub use future::{FutureState, PutFuture, RoutingOutcome};
pub use semantics::{AddSemantics, PutSemantics, QuerySemantics, RemoveSemantics};
pub use server::StorageRpc;

/// How many fresh random content keys an ADD in list mode tries before
/// giving up and surfacing the last store status. The key space is
/// sparse, so more than one round is already rare; the cap only guards
/// against a store that keeps answering "exists".
pub const MAX_ADD_KEY_ATTEMPTS: usize = 32;
