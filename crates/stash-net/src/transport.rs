//! Transport contract and the TCP/UDP implementation.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use stash_core::{CanonicalDecode, CanonicalEncode, DecodeError};
use stash_proto::Message;
use thiserror::Error;
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, warn};

use crate::framing::{read_frame, write_frame};
use crate::PeerAddress;

/// Transport failures surfaced to the client-side dispatch.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connecting to the peer failed.
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        /// The peer's socket address
        addr: SocketAddr,
        /// The underlying I/O error
        source: std::io::Error,
    },

    /// The peer did not answer within the deadline.
    #[error("request deadline elapsed")]
    DeadlineElapsed,

    /// A frame exceeded the configured size bound.
    #[error("frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared frame size
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// The peer's bytes did not decode into a message.
    #[error("malformed message from peer: {0}")]
    Malformed(#[from] DecodeError),

    /// The response does not correlate with the request.
    #[error("response id {got} does not match request id {expected}")]
    IdMismatch {
        /// Id the request carried
        expected: u64,
        /// Id the response carried
        got: u64,
    },

    /// Plain I/O failure mid-exchange.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether a request travels over the stream or the datagram path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// Framed TCP; the default
    Tcp,
    /// Single-datagram UDP, for callers that force it
    Udp,
}

/// Transport tuning knobs.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-request deadline covering connect, send, and response
    pub request_timeout: Duration,
    /// Maximum accepted frame size in bytes
    pub max_frame_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_frame_bytes: 4 * 1024 * 1024,
        }
    }
}

/// The seam the RPC client dispatches requests through.
///
/// One call is one request/response exchange; the transport owns framing,
/// deadlines, and response correlation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `message` to `peer` and awaits the matching response.
    async fn request(
        &self,
        peer: &PeerAddress,
        message: Message,
        mode: ChannelMode,
    ) -> Result<Message, TransportError>;
}

/// TCP/UDP transport. TCP opens a connection per exchange; UDP sends one
/// datagram and waits for one back.
pub struct NetTransport {
    config: TransportConfig,
}

impl NetTransport {
    /// Creates a transport.
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    async fn exchange_tcp(
        &self,
        peer: &PeerAddress,
        message: &Message,
    ) -> Result<Message, TransportError> {
        let mut stream =
            TcpStream::connect(peer.addr)
                .await
                .map_err(|source| TransportError::ConnectFailed {
                    addr: peer.addr,
                    source,
                })?;
        write_frame(&mut stream, message).await?;
        read_frame(&mut stream, self.config.max_frame_bytes).await
    }

    async fn exchange_udp(
        &self,
        peer: &PeerAddress,
        message: &Message,
    ) -> Result<Message, TransportError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(peer.addr).await?;
        socket.send(&message.to_vec()).await?;

        let mut buf = vec![0u8; self.config.max_frame_bytes.min(65_536)];
        let received = socket.recv(&mut buf).await?;
        Ok(Message::from_bytes(&buf[..received])?)
    }
}

#[async_trait]
impl Transport for NetTransport {
    async fn request(
        &self,
        peer: &PeerAddress,
        message: Message,
        mode: ChannelMode,
    ) -> Result<Message, TransportError> {
        let id = message.id();
        debug!(%peer, id, ?mode, "sending request");

        let exchange = async {
            match mode {
                ChannelMode::Tcp => self.exchange_tcp(peer, &message).await,
                ChannelMode::Udp => self.exchange_udp(peer, &message).await,
            }
        };
        let response = tokio::time::timeout(self.config.request_timeout, exchange)
            .await
            .map_err(|_| {
                warn!(%peer, id, "request deadline elapsed");
                TransportError::DeadlineElapsed
            })??;

        if response.id() != id {
            warn!(%peer, expected = id, got = response.id(), "dropping uncorrelated response");
            return Err(TransportError::IdMismatch {
                expected: id,
                got: response.id(),
            });
        }
        Ok(response)
    }
}
