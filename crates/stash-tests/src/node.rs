//! A single in-process storage node for tests.

use std::sync::Arc;

use parking_lot::Mutex;
use stash_core::{Key160, SigningKey};
use stash_net::{NetTransport, PeerAddress, RpcServer, TransportConfig, TransportError};
use stash_rpc::{StorageClient, StorageRpc};
use stash_store::{
    MemoryStore, ResponsibilityTracker, ResponsibilityUpdate, StoreConfig,
};
use tokio::sync::mpsc;

/// Knobs for a test node.
#[derive(Debug, Clone, Default)]
pub struct TestNodeConfig {
    /// Store limits
    pub store: StoreConfig,
    /// Transport timeouts and frame bounds
    pub transport: TransportConfig,
}

/// A storage node serving the RPC on a loopback socket, plus a client
/// talking through the real transport.
pub struct TestNode {
    /// This node's peer id
    pub node_id: Key160,
    signing_key: SigningKey,
    store: Arc<MemoryStore>,
    tracker: Arc<ResponsibilityTracker>,
    responsibility_rx: Mutex<mpsc::UnboundedReceiver<ResponsibilityUpdate>>,
    server: RpcServer,
    client: StorageClient,
}

impl TestNode {
    /// Starts a node on an ephemeral loopback port.
    pub async fn start(config: TestNodeConfig) -> Result<Self, TransportError> {
        let signing_key = SigningKey::random();
        let node_id = Key160::hash_of(signing_key.public_key().as_bytes());
        let store = Arc::new(MemoryStore::new(config.store.clone()));
        let (tracker, responsibility_rx) = ResponsibilityTracker::new();
        let tracker = Arc::new(tracker);

        let rpc = StorageRpc::new(node_id, signing_key.clone(), store.clone())
            .with_replication(tracker.clone());
        let server = RpcServer::bind(
            "127.0.0.1:0".parse().expect("loopback addr"),
            Arc::new(rpc),
            config.transport.clone(),
        )
        .await?;

        let transport = Arc::new(NetTransport::new(config.transport));
        let client = StorageClient::new(node_id, signing_key.clone(), transport);

        Ok(Self {
            node_id,
            signing_key,
            store,
            tracker,
            responsibility_rx: Mutex::new(responsibility_rx),
            server,
            client,
        })
    }

    /// Where peers reach this node.
    pub fn address(&self) -> PeerAddress {
        PeerAddress::new(self.node_id, self.server.local_addr())
    }

    /// The node's RPC client.
    pub fn client(&self) -> &StorageClient {
        &self.client
    }

    /// Direct access to the node's store.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// The node's signing key, for protection scenarios.
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// The replication tracker fed by the node's handlers.
    pub fn tracker(&self) -> &Arc<ResponsibilityTracker> {
        &self.tracker
    }

    /// Drains all queued responsibility updates.
    pub fn drain_responsibilities(&self) -> Vec<ResponsibilityUpdate> {
        let mut rx = self.responsibility_rx.lock();
        let mut updates = Vec::new();
        while let Ok(update) = rx.try_recv() {
            updates.push(update);
        }
        updates
    }

    /// Stops the node's server.
    pub fn shutdown(&self) {
        self.server.shutdown();
    }
}
