//! Length-prefixed message framing.
//!
//! Every message on the wire is a 4-byte big-endian length followed by the
//! payload. Connections carry a sequence of such frames in both directions.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::Error;

/// Maximum message size (4 MB).
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Encode a payload with a length prefix.
///
/// Returns a new buffer containing `[length (4 bytes BE)][payload]`.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, Error> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(Error::InvalidMessage(format!(
            "payload size {} exceeds maximum {}",
            payload.len(),
            MAX_MESSAGE_SIZE
        )));
    }

    let len = payload.len() as u32;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decode the payload length from a 4-byte header.
pub fn decode_frame_length(header: &[u8; LENGTH_PREFIX_SIZE]) -> Result<usize, Error> {
    let len = u32::from_be_bytes(*header) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(Error::InvalidMessage(format!(
            "frame length {} exceeds maximum {}",
            len, MAX_MESSAGE_SIZE
        )));
    }
    Ok(len)
}

/// Read one frame from `reader` and return its payload.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly before the
/// first byte of a new frame. A stream that ends mid-frame is an error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, Error>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; LENGTH_PREFIX_SIZE];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_SIZE {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::InvalidMessage(format!(
                "stream closed inside frame header ({} of {} bytes)",
                filled, LENGTH_PREFIX_SIZE
            )));
        }
        filled += n;
    }

    let len = decode_frame_length(&header)?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write an already-framed buffer to `writer` and flush it.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame_small() {
        let payload = b"hello";
        let frame = encode_frame(payload).unwrap();

        assert_eq!(frame.len(), LENGTH_PREFIX_SIZE + payload.len());
        assert_eq!(&frame[..4], &[0, 0, 0, 5]);
        assert_eq!(&frame[4..], payload);
    }

    #[test]
    fn test_encode_frame_too_large() {
        let payload = vec![0u8; MAX_MESSAGE_SIZE + 1];
        assert!(encode_frame(&payload).is_err());
    }

    #[test]
    fn test_decode_frame_length_too_large() {
        let header = ((MAX_MESSAGE_SIZE as u32) + 1).to_be_bytes();
        assert!(decode_frame_length(&header).is_err());
    }

    #[tokio::test]
    async fn test_read_frames_in_sequence() {
        let (mut client, mut server) = tokio::io::duplex(64);

        write_frame(&mut client, &encode_frame(b"first").unwrap())
            .await
            .unwrap();
        write_frame(&mut client, &encode_frame(b"").unwrap())
            .await
            .unwrap();
        drop(client);

        assert_eq!(read_frame(&mut server).await.unwrap().unwrap(), b"first");
        assert!(read_frame(&mut server).await.unwrap().unwrap().is_empty());
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_truncated_header() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut client, &[0, 0]).await.unwrap();
        drop(client);

        assert!(read_frame(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn test_read_frame_truncated_payload() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut client, &[0, 0, 0, 8, 1, 2]).await.unwrap();
        drop(client);

        assert!(matches!(
            read_frame(&mut server).await,
            Err(Error::Io(_))
        ));
    }
}
