//! Length-prefixed message framing for stream transports.
//!
//! Each frame is a u32 little-endian byte length followed by the
//! canonical message encoding. Datagram transports skip the prefix and
//! carry one message per datagram.

use stash_core::{CanonicalDecode, CanonicalEncode};
use stash_proto::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::transport::TransportError;

/// Writes one framed message to a stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    stream: &mut W,
    message: &Message,
) -> Result<(), TransportError> {
    let payload = message.to_vec();
    stream.write_u32_le(payload.len() as u32).await?;
    stream.write_all(&payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads one framed message from a stream, enforcing `max_frame_bytes`.
pub async fn read_frame<R: AsyncRead + Unpin>(
    stream: &mut R,
    max_frame_bytes: usize,
) -> Result<Message, TransportError> {
    let len = stream.read_u32_le().await? as usize;
    if len > max_frame_bytes {
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: max_frame_bytes,
        });
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Message::from_bytes(&payload).map_err(TransportError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stash_core::Key160;
    use stash_proto::{Command, MessageType};

    fn sample() -> Message {
        Message::request(
            1,
            Command::Get,
            MessageType::Request1,
            Key160::random(),
            Key160::random(),
        )
    }

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let message = sample();
        let mut wire = Vec::new();
        write_frame(&mut wire, &message).await.unwrap();

        let mut reader = wire.as_slice();
        let decoded = read_frame(&mut reader, 1 << 20).await.unwrap();
        assert_eq!(message, decoded);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let message = sample();
        let mut wire = Vec::new();
        write_frame(&mut wire, &message).await.unwrap();

        let mut reader = wire.as_slice();
        let err = read_frame(&mut reader, 4).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { .. }));
    }
}
