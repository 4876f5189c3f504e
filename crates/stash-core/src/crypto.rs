//! Hashing and signing primitives.
//!
//! Content keys are 160-bit truncations of BLAKE3; access control uses
//! Ed25519. Both are kept behind thin wrappers so the rest of the
//! workspace never touches the underlying crates directly.

use std::fmt;

use bytes::{Bytes, BytesMut};
use ed25519_dalek::{Signer, Verifier};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use thiserror::Error;
use zeroize::Zeroize;

use crate::encoding::{CanonicalDecode, CanonicalEncode, DecodeError};
use crate::{KEY160_BYTES, PUBLIC_KEY_BYTES, SIGNATURE_BYTES};

/// Errors from signature creation or verification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// The public key bytes do not describe a valid curve point.
    #[error("malformed public key")]
    MalformedPublicKey,

    /// The signature did not verify against the message and key.
    #[error("signature verification failed")]
    Invalid,
}

/// Hashes `data` into the 160-bit key space (truncated BLAKE3).
pub fn hash160(data: &[u8]) -> [u8; KEY160_BYTES] {
    let digest = blake3::hash(data);
    let mut out = [0u8; KEY160_BYTES];
    out.copy_from_slice(&digest.as_bytes()[..KEY160_BYTES]);
    out
}

/// An Ed25519 public key identifying a protection owner.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_BYTES]);

impl PublicKey {
    /// Creates a public key from raw bytes.
    pub const fn new(bytes: [u8; PUBLIC_KEY_BYTES]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; PUBLIC_KEY_BYTES] {
        &self.0
    }

    /// Verifies `signature` over `message`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), SignatureError> {
        let key = ed25519_dalek::VerifyingKey::from_bytes(&self.0)
            .map_err(|_| SignatureError::MalformedPublicKey)?;
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify(message, &sig).map_err(|_| SignatureError::Invalid)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &hex::encode(self.0)[..12])
    }
}

impl CanonicalEncode for PublicKey {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
    }
}

impl CanonicalDecode for PublicKey {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self(<[u8; PUBLIC_KEY_BYTES]>::decode(buf)?))
    }
}

/// A detached Ed25519 signature.
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde_as(as = "[_; 64]")] pub [u8; SIGNATURE_BYTES]);

impl Signature {
    /// Creates a signature from raw bytes.
    pub const fn new(bytes: [u8; SIGNATURE_BYTES]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", &hex::encode(self.0)[..12])
    }
}

impl CanonicalEncode for Signature {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
    }
}

impl CanonicalDecode for Signature {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self(<[u8; SIGNATURE_BYTES]>::decode(buf)?))
    }
}

/// An Ed25519 signing key held by a peer.
///
/// The seed zeroizes on drop and never appears in `Debug` output.
#[derive(Clone)]
pub struct SigningKey(pub [u8; 32]);

impl SigningKey {
    /// Creates a signing key from a seed.
    pub const fn new(seed: [u8; 32]) -> Self {
        Self(seed)
    }

    /// Generates a fresh random signing key.
    pub fn random() -> Self {
        use rand::RngCore;
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self(seed)
    }

    /// Derives the matching public key.
    pub fn public_key(&self) -> PublicKey {
        let key = ed25519_dalek::SigningKey::from_bytes(&self.0);
        PublicKey(key.verifying_key().to_bytes())
    }

    /// Signs `message`.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let key = ed25519_dalek::SigningKey::from_bytes(&self.0);
        Signature(key.sign(message).to_bytes())
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKey([REDACTED])")
    }
}

impl Drop for SigningKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let key = SigningKey::random();
        let message = b"store this entry";
        let signature = key.sign(message);
        assert!(key.public_key().verify(message, &signature).is_ok());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let key = SigningKey::random();
        let other = SigningKey::random();
        let signature = key.sign(b"entry");
        assert_eq!(
            other.public_key().verify(b"entry", &signature),
            Err(SignatureError::Invalid)
        );
    }

    #[test]
    fn test_tampered_message_rejected() {
        let key = SigningKey::random();
        let signature = key.sign(b"entry");
        assert!(key.public_key().verify(b"entry2", &signature).is_err());
    }

    #[test]
    fn test_hash160_width() {
        let digest = hash160(b"x");
        assert_eq!(digest.len(), KEY160_BYTES);
        // Truncation of the full BLAKE3 digest, not a different function.
        assert_eq!(&digest[..], &blake3::hash(b"x").as_bytes()[..KEY160_BYTES]);
    }
}
