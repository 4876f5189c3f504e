//! Server loop: accepts inbound messages and hands them to a handler.
//!
//! Each TCP connection and each UDP datagram is served on its own task;
//! the handler itself is synchronous and must not block, so a slow peer
//! only ever stalls its own connection task.

use std::net::SocketAddr;
use std::sync::Arc;

use stash_core::{CanonicalDecode, CanonicalEncode};
use stash_proto::Message;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::framing::{read_frame, write_frame};
use crate::transport::{TransportConfig, TransportError};

/// The seam between transport and RPC dispatch: one request message in,
/// one response message out.
pub trait MessageHandler: Send + Sync + 'static {
    /// Produces the response for an inbound request.
    fn handle(&self, message: Message) -> Message;
}

/// Listens on TCP and UDP and dispatches inbound requests.
pub struct RpcServer {
    local_addr: SocketAddr,
    tcp_task: JoinHandle<()>,
    udp_task: JoinHandle<()>,
}

impl RpcServer {
    /// Binds both sockets on `addr` and starts serving.
    ///
    /// Passing port 0 picks an ephemeral port; the UDP socket binds the
    /// same port the TCP listener got.
    pub async fn bind(
        addr: SocketAddr,
        handler: Arc<dyn MessageHandler>,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let udp = UdpSocket::bind(local_addr).await?;
        info!(%local_addr, "storage rpc listening");

        let tcp_handler = handler.clone();
        let tcp_config = config.clone();
        let tcp_task = tokio::spawn(async move {
            loop {
                let (stream, remote) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(%err, "accept failed");
                        continue;
                    }
                };
                let handler = tcp_handler.clone();
                let config = tcp_config.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve_stream(stream, remote, handler, config).await {
                        debug!(%remote, %err, "connection closed");
                    }
                });
            }
        });

        let udp_task = tokio::spawn(async move {
            let udp = Arc::new(udp);
            let mut buf = vec![0u8; 65_536];
            loop {
                let (len, remote) = match udp.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(err) => {
                        warn!(%err, "udp recv failed");
                        continue;
                    }
                };
                let request = match Message::from_bytes(&buf[..len]) {
                    Ok(message) => message,
                    Err(err) => {
                        debug!(%remote, %err, "dropping malformed datagram");
                        continue;
                    }
                };
                let handler = handler.clone();
                let udp = udp.clone();
                tokio::spawn(async move {
                    let response = handler.handle(request);
                    if let Err(err) = udp.send_to(&response.to_vec(), remote).await {
                        debug!(%remote, %err, "udp response send failed");
                    }
                });
            }
        });

        Ok(Self {
            local_addr,
            tcp_task,
            udp_task,
        })
    }

    /// The bound address (useful with ephemeral ports).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops both listener tasks.
    pub fn shutdown(&self) {
        self.tcp_task.abort();
        self.udp_task.abort();
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Serves framed requests on one TCP connection until the peer hangs up.
async fn serve_stream(
    mut stream: tokio::net::TcpStream,
    remote: SocketAddr,
    handler: Arc<dyn MessageHandler>,
    config: TransportConfig,
) -> Result<(), TransportError> {
    loop {
        let request = match read_frame(&mut stream, config.max_frame_bytes).await {
            Ok(message) => message,
            Err(TransportError::Io(err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        debug!(%remote, id = request.id(), "inbound request");
        let response = handler.handle(request);
        write_frame(&mut stream, &response).await?;
    }
}
