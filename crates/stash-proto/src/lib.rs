//! Stash Protocol - Wire messages for the storage RPC.
//!
//! This crate defines:
//! - The slotted request/response [`Message`] and its canonical codec
//! - Command opcodes and request/response types
//! - Value containers ([`Data`], [`DataMap`], [`KeyCollection`],
//!   [`KeyMapByte`], [`KeyMap640`])
//! - Approximate-membership filters over the key space

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod bloom;
pub mod data;
pub mod message;

pub use bloom::{BloomFilterFactory, KeyBloomFilter};
pub use data::{Data, DataMap, KeyCollection, KeyMap640, KeyMapByte};
pub use message::{Command, Message, MessageType, ProtoError};

/// Hard cap on the number of entries a single data map may carry.
pub const MAX_DATA_MAP_ENTRIES: usize = 4096;

/// Hard cap on the payload size of a single entry, in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;
