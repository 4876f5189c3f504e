//! Canonical encoding for wire messages and signed payloads.
//!
//! Everything that crosses the wire or feeds a signature goes through this
//! codec so that the byte representation is deterministic.
//!
//! # Encoding rules
//!
//! - **Integers**: little-endian
//! - **Booleans**: one byte, `0x00` or `0x01`
//! - **Fixed arrays**: raw bytes, no length prefix
//! - **Variable sequences**: u32 element count followed by the elements
//! - **Byte strings**: u32 byte length followed by the bytes
//! - **Options**: `0x00` for `None`, `0x01` followed by the value
//! - **Structs**: fields in declaration order
//! - **Enums**: u8 or u32 tag as documented on the type

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Errors raised while decoding canonical bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ran out before the value was complete.
    #[error("truncated input: needed {needed} more bytes, {remaining} available")]
    Truncated {
        /// Bytes still required
        needed: usize,
        /// Bytes left in the buffer
        remaining: usize,
    },

    /// An enum tag did not map to any variant.
    #[error("unknown tag {0}")]
    UnknownTag(u32),

    /// An option marker byte was neither 0 nor 1.
    #[error("invalid option marker {0:#04x}")]
    InvalidOptionMarker(u8),

    /// A declared length exceeds the sanity bound.
    #[error("declared length {0} exceeds limit")]
    LengthOverflow(usize),

    /// A slot or field combination that the protocol forbids.
    #[error("{0}")]
    Invalid(String),
}

/// Upper bound on any single length prefix, to stop hostile inputs from
/// forcing huge allocations before the buffer check.
const MAX_SEQUENCE_LEN: usize = 1 << 24;

/// Types with a deterministic byte encoding.
pub trait CanonicalEncode {
    /// Appends the canonical encoding of `self` to `buf`.
    fn encode(&self, buf: &mut BytesMut);

    /// Encodes into a freshly allocated buffer.
    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Encodes into a `Vec<u8>`.
    fn to_vec(&self) -> Vec<u8> {
        self.to_bytes().to_vec()
    }
}

/// Types that can be reconstructed from their canonical encoding.
pub trait CanonicalDecode: Sized {
    /// Decodes a value from the front of `buf`, advancing it.
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError>;

    /// Decodes a value from a byte slice.
    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = Bytes::copy_from_slice(bytes);
        Self::decode(&mut buf)
    }
}

fn need(buf: &Bytes, n: usize) -> Result<(), DecodeError> {
    if buf.remaining() < n {
        return Err(DecodeError::Truncated {
            needed: n - buf.remaining(),
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

impl CanonicalEncode for u8 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(*self);
    }
}

impl CanonicalDecode for u8 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        need(buf, 1)?;
        Ok(buf.get_u8())
    }
}

impl CanonicalEncode for u32 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(*self);
    }
}

impl CanonicalDecode for u32 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        need(buf, 4)?;
        Ok(buf.get_u32_le())
    }
}

impl CanonicalEncode for i32 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(*self);
    }
}

impl CanonicalDecode for i32 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        need(buf, 4)?;
        Ok(buf.get_i32_le())
    }
}

impl CanonicalEncode for u64 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(*self);
    }
}

impl CanonicalDecode for u64 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        need(buf, 8)?;
        Ok(buf.get_u64_le())
    }
}

impl CanonicalEncode for bool {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(*self));
    }
}

impl CanonicalDecode for bool {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        match u8::decode(buf)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::InvalidOptionMarker(other)),
        }
    }
}

impl<const N: usize> CanonicalEncode for [u8; N] {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self);
    }
}

impl<const N: usize> CanonicalDecode for [u8; N] {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        need(buf, N)?;
        let mut out = [0u8; N];
        buf.copy_to_slice(&mut out);
        Ok(out)
    }
}

impl<T: CanonicalEncode> CanonicalEncode for Option<T> {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            None => buf.put_u8(0),
            Some(value) => {
                buf.put_u8(1);
                value.encode(buf);
            }
        }
    }
}

impl<T: CanonicalDecode> CanonicalDecode for Option<T> {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        match u8::decode(buf)? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(buf)?)),
            other => Err(DecodeError::InvalidOptionMarker(other)),
        }
    }
}

impl<T: CanonicalEncode> CanonicalEncode for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) {
        (self.len() as u32).encode(buf);
        for item in self {
            item.encode(buf);
        }
    }
}

impl<T: CanonicalDecode> CanonicalDecode for Vec<T> {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let len = u32::decode(buf)? as usize;
        if len > MAX_SEQUENCE_LEN {
            return Err(DecodeError::LengthOverflow(len));
        }
        let mut out = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            out.push(T::decode(buf)?);
        }
        Ok(out)
    }
}

impl CanonicalEncode for Bytes {
    fn encode(&self, buf: &mut BytesMut) {
        (self.len() as u32).encode(buf);
        buf.put_slice(self);
    }
}

impl CanonicalDecode for Bytes {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let len = u32::decode(buf)? as usize;
        if len > MAX_SEQUENCE_LEN {
            return Err(DecodeError::LengthOverflow(len));
        }
        need(buf, len)?;
        Ok(buf.split_to(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_roundtrip() {
        let mut buf = BytesMut::new();
        0xDEAD_BEEFu32.encode(&mut buf);
        (-7i32).encode(&mut buf);
        42u64.encode(&mut buf);

        let mut bytes = buf.freeze();
        assert_eq!(u32::decode(&mut bytes).unwrap(), 0xDEAD_BEEF);
        assert_eq!(i32::decode(&mut bytes).unwrap(), -7);
        assert_eq!(u64::decode(&mut bytes).unwrap(), 42);
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_option_markers() {
        let some: Option<u32> = Some(9);
        let none: Option<u32> = None;
        assert_eq!(
            Option::<u32>::from_bytes(&some.to_vec()).unwrap(),
            Some(9)
        );
        assert_eq!(Option::<u32>::from_bytes(&none.to_vec()).unwrap(), None);

        // A bad marker byte is rejected outright.
        let err = Option::<u32>::from_bytes(&[7]).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidOptionMarker(7)));
    }

    #[test]
    fn test_truncated_input() {
        let err = u64::from_bytes(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn test_vec_roundtrip() {
        let values: Vec<u32> = vec![1, 2, 3, 500];
        let decoded = Vec::<u32>::from_bytes(&values.to_vec()).unwrap();
        assert_eq!(values, decoded);
    }

    #[test]
    fn test_hostile_length_rejected() {
        let mut buf = BytesMut::new();
        u32::MAX.encode(&mut buf);
        let err = Vec::<u8>::from_bytes(&buf.freeze()).unwrap_err();
        assert!(matches!(err, DecodeError::LengthOverflow(_)));
    }

    #[test]
    fn test_bytes_roundtrip() {
        let payload = Bytes::from_static(b"opaque payload");
        let decoded = Bytes::from_bytes(&payload.to_vec()).unwrap();
        assert_eq!(payload, decoded);
    }
}
