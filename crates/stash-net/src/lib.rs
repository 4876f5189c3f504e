//! Stash Net - Transport for storage messages.
//!
//! Provides the [`Transport`] contract the RPC client dispatches through,
//! a combined TCP/UDP implementation, and the server loop that feeds
//! inbound messages to a [`MessageHandler`].

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod framing;
pub mod server;
pub mod transport;

use std::net::SocketAddr;

use stash_core::Key160;

pub use server::{MessageHandler, RpcServer};
pub use transport::{ChannelMode, NetTransport, Transport, TransportConfig, TransportError};

/// A remote peer: its 160-bit id and where to reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    /// Peer identifier
    pub id: Key160,
    /// Socket address of the peer's storage endpoint
    pub addr: SocketAddr,
}

impl PeerAddress {
    /// Creates a peer address.
    pub fn new(id: Key160, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}
