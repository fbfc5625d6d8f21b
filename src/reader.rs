//! Buffered, cancellable reader for the protocol side of a connection.
//!
//! Sniffing needs to look at the first bytes of a connection without
//! consuming them, and the framed loop then needs exact-length reads of the
//! same bytes. Both go through one read-ahead buffer: `peek` only looks at
//! it, `read_exact` consumes from it before touching the socket again.
//!
//! Every read races the session's cancellation token, so a session parked
//! on an idle peer still stops promptly at shutdown.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{FrameError, Result};
use crate::protocols::frame::codec::{decode_header, Frame, HEADER_SIZE};

/// Initial read-ahead capacity.
const BUFFER_SIZE: usize = 4 * 1024;

/// Two-phase (peek, then consume) reader over an async byte stream.
pub struct StreamReader<R> {
    inner: R,
    buffer: BytesMut,
    cancel: CancellationToken,
}

impl<R: AsyncRead + Unpin> StreamReader<R> {
    pub fn new(inner: R, cancel: CancellationToken) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
            cancel,
        }
    }

    /// Return up to `n` buffered bytes without consuming them.
    ///
    /// Only reads from the stream when nothing is buffered yet. A result
    /// shorter than `n` means "not enough data yet"; call [`fill`] to wait
    /// for more.
    ///
    /// [`fill`]: StreamReader::fill
    pub async fn peek(&mut self, n: usize) -> Result<&[u8]> {
        if self.buffer.is_empty() {
            self.read_more(n).await?;
        }
        let len = n.min(self.buffer.len());
        Ok(&self.buffer[..len])
    }

    /// Wait for at least one more byte to be buffered.
    pub async fn fill(&mut self) -> Result<()> {
        let expected = self.buffer.len() + 1;
        self.read_more(expected).await
    }

    /// Consume exactly `n` bytes, reading as many times as needed.
    ///
    /// EOF or a read error before `n` bytes arrive is a `ShortRead`; the
    /// caller treats it as the peer having gone away.
    pub async fn read_exact(&mut self, n: usize) -> Result<Bytes> {
        if self.buffer.len() < n {
            self.buffer.reserve(n - self.buffer.len());
        }
        while self.buffer.len() < n {
            self.read_more(n).await?;
        }
        Ok(self.buffer.split_to(n).freeze())
    }

    /// Read one complete frame.
    ///
    /// `max_body` of `None` accepts any declared length. An oversized
    /// length is rejected before the body is read or allocated.
    pub async fn read_frame(&mut self, max_body: Option<usize>) -> Result<Frame> {
        let raw = self.read_exact(HEADER_SIZE).await?;
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&raw);
        let header = decode_header(&header)?;

        let len = header.length as usize;
        if let Some(max) = max_body {
            if len > max {
                return Err(FrameError::BodyTooLarge { len, max });
            }
        }

        let body = if len == 0 {
            Bytes::new()
        } else {
            self.read_exact(len).await?
        };

        Ok(Frame::new(header.msg_type, body))
    }

    /// Take everything currently buffered.
    pub fn drain_buffered(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Number of bytes read from the stream but not yet consumed.
    #[cfg(test)]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    async fn read_more(&mut self, expected: usize) -> Result<()> {
        let got = self.buffer.len();
        let read = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(FrameError::Cancelled),
            read = self.inner.read_buf(&mut self.buffer) => read,
        };

        match read {
            Ok(0) => Err(FrameError::ShortRead { expected, got }),
            Ok(_) => Ok(()),
            Err(e) => {
                debug!(error = %e, "Read failed");
                Err(FrameError::ShortRead { expected, got })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::frame::codec::{encode, MessageType};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio_test::io::Builder;

    fn reader<R: AsyncRead + Unpin>(inner: R) -> StreamReader<R> {
        StreamReader::new(inner, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_read_exact_single_byte_chunks() {
        let payload = b"twelve bytes and then some";
        let mut builder = Builder::new();
        for byte in payload.iter() {
            builder.read(std::slice::from_ref(byte));
        }
        let mut reader = reader(builder.build());

        let first = reader.read_exact(12).await.unwrap();
        assert_eq!(&first[..], b"twelve bytes");
        let rest = reader.read_exact(payload.len() - 12).await.unwrap();
        assert_eq!(&rest[..], &payload[12..]);
    }

    #[tokio::test]
    async fn test_read_exact_uneven_chunks() {
        let mock = Builder::new()
            .read(b"ab")
            .read(b"cdefg")
            .read(b"h")
            .read(b"ijkl")
            .build();
        let mut reader = reader(mock);

        assert_eq!(&reader.read_exact(3).await.unwrap()[..], b"abc");
        assert_eq!(&reader.read_exact(9).await.unwrap()[..], b"defghijkl");
        assert_eq!(reader.buffered(), 0);
    }

    #[tokio::test]
    async fn test_read_exact_short_read() {
        let mock = Builder::new().read(b"abc").build();
        let mut reader = reader(mock);

        match reader.read_exact(8).await {
            Err(FrameError::ShortRead { expected: 8, got: 3 }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_peek_does_not_consume() {
        let mock = Builder::new().read(b"GET ").read(b"/ HTTP").build();
        let mut reader = reader(mock);

        assert_eq!(reader.peek(12).await.unwrap(), b"GET ");
        // Still buffered, no new read.
        assert_eq!(reader.peek(12).await.unwrap(), b"GET ");

        reader.fill().await.unwrap();
        assert_eq!(reader.peek(12).await.unwrap(), b"GET / HTTP");
        assert_eq!(&reader.read_exact(4).await.unwrap()[..], b"GET ");
        assert_eq!(&reader.drain_buffered()[..], b"/ HTTP");
    }

    #[tokio::test]
    async fn test_peek_on_eof() {
        let mock = Builder::new().build();
        let mut reader = reader(mock);
        assert!(matches!(
            reader.peek(12).await,
            Err(FrameError::ShortRead { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_frame_split_across_reads() {
        let encoded = encode(MessageType::Send, b"2:hello");
        let mock = Builder::new()
            .read(&encoded[..5])
            .read(&encoded[5..13])
            .read(&encoded[13..])
            .build();
        let mut reader = reader(mock);

        let frame = reader.read_frame(None).await.unwrap();
        assert_eq!(frame.msg_type, MessageType::Send);
        assert_eq!(frame.text(), "2:hello");
    }

    #[tokio::test]
    async fn test_read_frame_body_too_large() {
        let encoded = encode(MessageType::Send, b"0123456789");
        let mock = Builder::new().read(&encoded[..HEADER_SIZE]).build();
        let mut reader = reader(mock);

        match reader.read_frame(Some(4)).await {
            Err(FrameError::BodyTooLarge { len: 10, max: 4 }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_frame_bad_magic() {
        let mock = Builder::new().read(b"HELLO WORLD!").build();
        let mut reader = reader(mock);
        assert!(matches!(
            reader.read_frame(None).await,
            Err(FrameError::BadMagic(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_unblocks_pending_read() {
        let (client, server) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let mut reader = StreamReader::new(server, cancel.clone());

        let pending = tokio::spawn(async move { reader.read_exact(HEADER_SIZE).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("read did not stop after cancel")
            .unwrap();
        assert!(matches!(result, Err(FrameError::Cancelled)));
        drop(client);
    }

    #[tokio::test]
    async fn test_cancel_mid_frame() {
        let (mut client, server) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let mut reader = StreamReader::new(server, cancel.clone());

        client.write_all(&encode(MessageType::Time, b"")[..6]).await.unwrap();
        cancel.cancel();

        assert!(matches!(
            reader.read_frame(None).await,
            Err(FrameError::Cancelled)
        ));
    }
}
