//! Wire framing and bootstrap messages.
//!
//! Parcels travel as `[u32 big-endian length][postcard-encoded body]`. The
//! length prefix keeps message boundaries intact across stream transports
//! and lets the reader reject oversized frames before allocating.

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{BootError, DecodeSnafu, EncodeSnafu, IoSnafu};
use crate::locality::LocalityAddress;

/// Messages exchanged during the bootstrap rendezvous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootMessage {
    /// A joining locality announcing itself to the root.
    Register {
        /// Address the sender listens on and wants acknowledged at.
        sender: LocalityAddress,
        /// Echo of the sender's incarnation; must match `sender.generation`.
        generation: u32,
    },
    /// The root's acknowledgment of a registration.
    Ack {
        /// Locality id assigned by the root (the root itself is 0).
        locality_id: u32,
        /// How many localities the root had registered when it acknowledged.
        registered_peers: u32,
    },
}

impl BootMessage {
    /// Encode to the postcard body carried inside a frame.
    pub fn encode(&self) -> Result<Vec<u8>, BootError> {
        postcard::to_stdvec(self).context(EncodeSnafu)
    }

    /// Decode a frame body.
    pub fn decode(bytes: &[u8]) -> Result<Self, BootError> {
        postcard::from_bytes(bytes).context(DecodeSnafu)
    }
}

/// Write one length-prefixed frame.
pub async fn write_frame<W>(
    writer: &mut W,
    payload: &[u8],
    max_size: usize,
    context: &str,
) -> Result<(), BootError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > max_size {
        return Err(BootError::FrameTooLarge {
            size: payload.len(),
            max: max_size,
        });
    }

    let len = payload.len() as u32;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .context(IoSnafu { context })?;
    writer
        .write_all(payload)
        .await
        .context(IoSnafu { context })?;
    writer.flush().await.context(IoSnafu { context })?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly before the
/// next length prefix.
pub async fn read_frame<R>(
    reader: &mut R,
    max_size: usize,
    context: &str,
) -> Result<Option<Vec<u8>>, BootError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err).context(IoSnafu { context }),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_size {
        return Err(BootError::FrameTooLarge {
            size: len,
            max: max_size,
        });
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .context(IoSnafu { context })?;
    Ok(Some(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_roundtrip() {
        let msg = BootMessage::Register {
            sender: LocalityAddress::new("10.0.0.2", 7910).with_generation(1),
            generation: 1,
        };
        let body = msg.encode().unwrap();

        let mut buf = Vec::new();
        write_frame(&mut buf, &body, 4096, "test").await.unwrap();
        // 4-byte prefix plus the body, nothing else
        assert_eq!(buf.len(), 4 + body.len());

        let mut cursor = std::io::Cursor::new(buf);
        let read = read_frame(&mut cursor, 4096, "test").await.unwrap().unwrap();
        assert_eq!(BootMessage::decode(&read).unwrap(), msg);
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(
            read_frame(&mut cursor, 4096, "test")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn oversized_frame_rejected_before_allocation() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&u32::MAX.to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor, 1024, "test").await.unwrap_err();
        assert!(matches!(err, BootError::FrameTooLarge { max: 1024, .. }));
    }

    #[tokio::test]
    async fn oversized_write_rejected() {
        let mut buf = Vec::new();
        let payload = vec![0u8; 32];
        let err = write_frame(&mut buf, &payload, 16, "test").await.unwrap_err();
        assert!(matches!(err, BootError::FrameTooLarge { size: 32, max: 16 }));
        assert!(buf.is_empty());
    }

    #[test]
    fn ack_roundtrips_through_postcard() {
        let msg = BootMessage::Ack {
            locality_id: 3,
            registered_peers: 3,
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(BootMessage::decode(&bytes).unwrap(), msg);
    }
}
