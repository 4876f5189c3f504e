//! Stash Core - Key space, canonical encoding, and crypto primitives.
//!
//! This crate provides:
//! - The composite key space (`Key160`, `Key320`, `Key480`, `Key640`)
//! - Canonical encoding for deterministic wire representation
//! - Content hashing (160-bit truncated BLAKE3)
//! - Ed25519 signing keys for message and entry protection

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod crypto;
pub mod encoding;
pub mod keys;

pub use crypto::{hash160, PublicKey, Signature, SignatureError, SigningKey};
pub use encoding::{CanonicalDecode, CanonicalEncode, DecodeError};
pub use keys::{Key160, Key320, Key480, Key640};

/// Width of a `Key160` in bytes.
pub const KEY160_BYTES: usize = 20;

/// Width of an Ed25519 public key in bytes.
pub const PUBLIC_KEY_BYTES: usize = 32;

/// Width of an Ed25519 signature in bytes.
pub const SIGNATURE_BYTES: usize = 64;
