//! Length-framed wire encoding
//!
//! `[u32 big-endian body length][bincode(Vec<frame>)]`. The body is the
//! frame list exactly as held by [`Message`]; the prefix lets stream readers
//! pull one message at a time.

use crate::protocol::{Message, ProtocolError};
use bincode::{deserialize, serialize};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const LENGTH_PREFIX_BYTES: usize = 4;
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;
/// Body buffer reserved up front; larger bodies grow as bytes arrive
const INITIAL_BODY_CAPACITY: usize = 64 * 1024;

/// Serializes a message including its length prefix
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let body = serialize(message.frames())?;
    if body.len() > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::Oversized(body.len()));
    }

    let mut data = Vec::with_capacity(LENGTH_PREFIX_BYTES + body.len());
    data.extend_from_slice(&(body.len() as u32).to_be_bytes());
    data.extend_from_slice(&body);
    Ok(data)
}

/// Checks a length prefix read from the stream
pub fn check_body_length(len: u32) -> Result<usize, ProtocolError> {
    let len = len as usize;
    if len > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::Oversized(len));
    }
    Ok(len)
}

/// Decodes a body (without prefix) into a message
pub fn decode_body(body: &[u8]) -> Result<Message, ProtocolError> {
    let frames: Vec<Vec<u8>> = deserialize(body)?;
    Ok(Message::from_frames(frames))
}

/// Outcome of reading one message from a stream
#[derive(Debug)]
pub enum ReadOutcome {
    Message(Message),
    /// Framing was intact but the body did not decode; the stream stays usable
    Undecodable(ProtocolError),
    /// Peer closed the stream cleanly between messages
    Eof,
}

/// Reads one length-framed message.
///
/// I/O errors and oversized prefixes are returned as `Err` since the stream
/// position can no longer be trusted.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<ReadOutcome> {
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(ReadOutcome::Eof),
        Err(e) => return Err(e),
    };
    let len = check_body_length(len).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    // A peer can declare a huge length and send nothing, so only allocate
    // what actually arrives
    let mut body = Vec::with_capacity(len.min(INITIAL_BODY_CAPACITY));
    (&mut *reader).take(len as u64).read_to_end(&mut body).await?;
    if body.len() < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("message body ended after {} of {} bytes", body.len(), len),
        ));
    }
    Ok(match decode_body(&body) {
        Ok(message) => ReadOutcome::Message(message),
        Err(e) => ReadOutcome::Undecodable(e),
    })
}

pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> io::Result<()> {
    let data = encode(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    writer.write_all(&data).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    #[test]
    fn test_prefix_matches_body_length() {
        let msg = Message::bare(&MessageType::ClientJoin);
        let data = encode(&msg).unwrap();

        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&data[..4]);
        assert_eq!(u32::from_be_bytes(prefix) as usize, data.len() - 4);

        let decoded = decode_body(&data[4..]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_binary_frames_preserved() {
        let msg = Message::from_frames(vec![b"FRAME_UPDATE".to_vec(), b"{}".to_vec(), vec![0, 255, 7]]);
        let data = encode(&msg).unwrap();
        assert_eq!(decode_body(&data[4..]).unwrap().binary_frames(), &[vec![0, 255, 7]]);
    }

    #[test]
    fn test_truncated_body_fails() {
        let data = encode(&Message::bare(&MessageType::ClientJoin)).unwrap();
        let body = &data[4..data.len() - 3];
        assert!(matches!(decode_body(body), Err(ProtocolError::Wire(_))));
    }

    #[tokio::test]
    async fn test_stream_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let join = Message::bare(&MessageType::ClientJoin);
        let update = Message::from_frames(vec![b"FRAME_UPDATE".to_vec(), b"{}".to_vec(), vec![1; 300]]);

        write_message(&mut a, &join).await.unwrap();
        write_message(&mut a, &update).await.unwrap();
        drop(a);

        match read_message(&mut b).await.unwrap() {
            ReadOutcome::Message(m) => assert_eq!(m, join),
            other => panic!("unexpected {:?}", other),
        }
        match read_message(&mut b).await.unwrap() {
            ReadOutcome::Message(m) => assert_eq!(m.binary_frames()[0].len(), 300),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(read_message(&mut b).await.unwrap(), ReadOutcome::Eof));
    }

    #[tokio::test]
    async fn test_undecodable_body_keeps_stream_usable() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(&3u32.to_be_bytes()).await.unwrap();
        a.write_all(&[0xFF, 0xFF, 0xFF]).await.unwrap();
        write_message(&mut a, &Message::bare(&MessageType::ClientJoin))
            .await
            .unwrap();

        assert!(matches!(
            read_message(&mut b).await.unwrap(),
            ReadOutcome::Undecodable(_)
        ));
        assert!(matches!(
            read_message(&mut b).await.unwrap(),
            ReadOutcome::Message(_)
        ));
    }

    #[tokio::test]
    async fn test_large_declared_length_with_short_body() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let declared = (MAX_MESSAGE_BYTES - 1) as u32;
        a.write_all(&declared.to_be_bytes()).await.unwrap();
        a.write_all(&[1, 2, 3, 4]).await.unwrap();
        drop(a);

        let err = read_message(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_oversized_length_rejected() {
        assert!(check_body_length(16).is_ok());
        assert!(matches!(
            check_body_length(u32::MAX),
            Err(ProtocolError::Oversized(_))
        ));
    }
}
