//! Length-prefixed framing over a byte stream.
//!
//! Each frame is a 4-byte big-endian length followed by exactly that many
//! bytes of UTF-8 JSON. The prefix lets both ends recover message
//! boundaries from a stream that delivers partial data; [`read_frame`]
//! keeps reading until a whole frame has arrived.

use crate::message::Message;
use std::io::ErrorKind;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame body size in bytes (64 KiB - 1).
pub const MAX_FRAME: usize = 65_535;

/// Errors that can occur while reading or writing frames.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The declared frame length exceeds [`MAX_FRAME`].
    #[error("frame length {actual} exceeds maximum {max}")]
    Oversize {
        /// Maximum allowed body length.
        max: usize,
        /// Declared body length.
        actual: usize,
    },
    /// The peer closed the stream cleanly between frames.
    #[error("connection closed")]
    Closed,
    /// The stream ended in the middle of a frame.
    #[error("stream closed mid-frame")]
    Truncated,
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Prepends the length prefix to a frame body.
///
/// # Errors
///
/// Returns [`FramingError::Oversize`] if the body exceeds [`MAX_FRAME`].
pub fn encode_frame(body: &[u8]) -> Result<Vec<u8>, FramingError> {
    if body.len() > MAX_FRAME {
        return Err(FramingError::Oversize {
            max: MAX_FRAME,
            actual: body.len(),
        });
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Incremental frame decoder for interleaved read loops.
///
/// `read_frame` blocks until a whole frame arrives, which makes it unsafe
/// to cancel mid-read (the partial prefix would be lost). Event loops that
/// `select!` between the socket and other work instead feed raw chunks in
/// with [`FrameBuffer::extend`] and drain complete frames with
/// [`FrameBuffer::next_frame`]; bytes of an incomplete frame stay buffered
/// across calls.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes read from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// `true` while a partially received frame is buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Pop the next complete frame body, or `None` until one has fully
    /// arrived.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::Oversize`] on a corrupt or hostile length
    /// prefix; the buffer is then poisoned for the connection and the
    /// caller must drop it.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_FRAME {
            return Err(FramingError::Oversize {
                max: MAX_FRAME,
                actual: len,
            });
        }
        if self.buf.len() < 4 + len {
            return Ok(None);
        }
        let body = self.buf[4..4 + len].to_vec();
        self.buf.drain(..4 + len);
        Ok(Some(body))
    }
}

/// Reads one frame body from the stream, waiting for split reads to
/// complete.
///
/// # Errors
///
/// Returns [`FramingError::Closed`] on a clean peer close at a frame
/// boundary, [`FramingError::Truncated`] on a close mid-frame, and
/// [`FramingError::Oversize`] on a corrupt or hostile length prefix.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                FramingError::Closed
            } else {
                FramingError::Truncated
            });
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME {
        return Err(FramingError::Oversize {
            max: MAX_FRAME,
            actual: len,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            FramingError::Truncated
        } else {
            FramingError::Io(e)
        }
    })?;
    Ok(body)
}

/// Writes one frame (prefix plus body) and flushes.
///
/// # Errors
///
/// Returns [`FramingError::Oversize`] for an over-large body or the
/// underlying I/O error.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(body)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Serializes and writes one [`Message`].
///
/// # Errors
///
/// Same as [`write_frame`].
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &message.to_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Response;

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, b"{\"response\": 200}").await.unwrap();
        let body = read_frame(&mut server).await.unwrap();
        assert_eq!(body, b"{\"response\": 200}");
    }

    #[tokio::test]
    async fn message_round_trip_through_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let msg = Message::Reply(Response::bad_request("nope"));
        write_message(&mut client, &msg).await.unwrap();
        let body = read_frame(&mut server).await.unwrap();
        assert_eq!(Message::from_slice(&body).unwrap(), msg);
    }

    #[tokio::test]
    async fn split_writes_reassemble() {
        use tokio::io::AsyncWriteExt;

        let (mut client, mut server) = tokio::io::duplex(1024);
        let frame = encode_frame(b"{\"response\": 205}").unwrap();

        let writer = tokio::spawn(async move {
            // Dribble the frame one byte at a time across task switches.
            for byte in frame {
                client.write_all(&[byte]).await.unwrap();
                client.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let body = read_frame(&mut server).await.unwrap();
        assert_eq!(body, b"{\"response\": 205}");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn clean_close_between_frames() {
        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);
        assert!(matches!(
            read_frame(&mut server).await,
            Err(FramingError::Closed)
        ));
    }

    #[tokio::test]
    async fn truncated_prefix_is_error() {
        use tokio::io::AsyncWriteExt;

        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&[0, 0]).await.unwrap();
        drop(client);
        assert!(matches!(
            read_frame(&mut server).await,
            Err(FramingError::Truncated)
        ));
    }

    #[tokio::test]
    async fn truncated_body_is_error_at_every_boundary() {
        use tokio::io::AsyncWriteExt;

        let frame = encode_frame(b"{\"response\": 200}").unwrap();
        // Cut the stream at every point inside the frame; no prefix-complete
        // cut may ever produce a message.
        for cut in 4..frame.len() {
            let (mut client, mut server) = tokio::io::duplex(1024);
            client.write_all(&frame[..cut]).await.unwrap();
            drop(client);
            assert!(
                matches!(read_frame(&mut server).await, Err(FramingError::Truncated)),
                "cut at {cut} produced a frame"
            );
        }
    }

    #[tokio::test]
    async fn oversize_prefix_is_rejected() {
        use tokio::io::AsyncWriteExt;

        let (mut client, mut server) = tokio::io::duplex(1024);
        client
            .write_all(&(u32::MAX).to_be_bytes())
            .await
            .unwrap();
        assert!(matches!(
            read_frame(&mut server).await,
            Err(FramingError::Oversize { .. })
        ));
    }

    #[test]
    fn frame_buffer_never_yields_partial_frames() {
        let frame = encode_frame(b"{\"response\": 200}").unwrap();
        let mut buffer = FrameBuffer::new();
        // Feed byte by byte: no prefix of the frame may ever decode.
        for (i, byte) in frame.iter().enumerate() {
            if i + 1 < frame.len() {
                buffer.extend(&[*byte]);
                assert!(buffer.next_frame().unwrap().is_none(), "partial at {i}");
            }
        }
        buffer.extend(&frame[frame.len() - 1..]);
        assert_eq!(buffer.next_frame().unwrap().unwrap(), b"{\"response\": 200}");
        assert!(!buffer.has_partial());
    }

    #[test]
    fn frame_buffer_drains_back_to_back_frames() {
        let mut bytes = encode_frame(b"one").unwrap();
        bytes.extend(encode_frame(b"two").unwrap());
        bytes.extend(encode_frame(b"three").unwrap());

        let mut buffer = FrameBuffer::new();
        buffer.extend(&bytes);
        assert_eq!(buffer.next_frame().unwrap().unwrap(), b"one");
        assert_eq!(buffer.next_frame().unwrap().unwrap(), b"two");
        assert_eq!(buffer.next_frame().unwrap().unwrap(), b"three");
        assert!(buffer.next_frame().unwrap().is_none());
    }

    #[test]
    fn frame_buffer_rejects_oversize_prefix() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(&u32::MAX.to_be_bytes());
        assert!(matches!(
            buffer.next_frame(),
            Err(FramingError::Oversize { .. })
        ));
    }

    #[test]
    fn encode_rejects_oversize_body() {
        let body = vec![b'x'; MAX_FRAME + 1];
        assert!(matches!(
            encode_frame(&body),
            Err(FramingError::Oversize { .. })
        ));
    }

    #[test]
    fn empty_body_is_a_valid_frame() {
        let frame = encode_frame(b"").unwrap();
        assert_eq!(frame, vec![0, 0, 0, 0]);
    }
}
