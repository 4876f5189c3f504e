//! Test harness for multi-node storage RPC scenarios.

#![deny(unsafe_code)]

pub mod harness;
pub mod node;

pub use harness::TestNetwork;
pub use node::{TestNode, TestNodeConfig};
