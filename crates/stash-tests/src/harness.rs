//! Multi-node test network.

use stash_net::{PeerAddress, TransportError};

use crate::node::{TestNode, TestNodeConfig};

/// A set of storage nodes on loopback sockets.
pub struct TestNetwork {
    nodes: Vec<TestNode>,
}

impl TestNetwork {
    /// Starts `count` nodes with default configuration.
    pub async fn with_nodes(count: usize) -> Result<Self, TransportError> {
        let mut nodes = Vec::with_capacity(count);
        for _ in 0..count {
            nodes.push(TestNode::start(TestNodeConfig::default()).await?);
        }
        Ok(Self { nodes })
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the network is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// A node by index.
    pub fn node(&self, index: usize) -> &TestNode {
        &self.nodes[index]
    }

    /// All node addresses.
    pub fn addresses(&self) -> Vec<PeerAddress> {
        self.nodes.iter().map(|node| node.address()).collect()
    }

    /// Stops every node.
    pub fn shutdown(&self) {
        for node in &self.nodes {
            node.shutdown();
        }
    }
}
