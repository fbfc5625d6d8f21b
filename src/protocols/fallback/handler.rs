//! One-shot plain-text exchange.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::Result;
use crate::reader::StreamReader;

/// Time spent discarding unread request bytes after replying. Closing with
/// unread input resets the connection and can drop the reply.
const LINGER: Duration = Duration::from_millis(500);

/// Consume the request, write `response` verbatim and close the write side.
///
/// Only what has already arrived is taken as the request; the client is
/// not required to send a complete request before it gets an answer.
pub async fn handle_request<R, W>(
    reader: &mut StreamReader<R>,
    mut writer: W,
    response: &[u8],
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let request = reader.drain_buffered();
    trace!(len = request.len(), "Fallback request");

    writer.write_all(response).await?;
    writer.shutdown().await?;

    let _ = tokio::time::timeout(LINGER, discard(reader)).await;
    Ok(())
}

/// Read and drop input until EOF or cancellation.
async fn discard<R: AsyncRead + Unpin>(reader: &mut StreamReader<R>) {
    while reader.fill().await.is_ok() {
        reader.drain_buffered();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;
    use tokio_util::sync::CancellationToken;

    const RESPONSE: &[u8] = b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\nhello";

    #[tokio::test]
    async fn test_partial_request_is_answered() {
        let input = Builder::new().read(b"GET /").build();
        let output = Builder::new().write(RESPONSE).build();
        let mut reader = StreamReader::new(input, CancellationToken::new());

        reader.peek(12).await.unwrap();
        handle_request(&mut reader, output, RESPONSE).await.unwrap();
        assert_eq!(reader.buffered(), 0);
    }

    #[tokio::test]
    async fn test_trailing_request_bytes_are_discarded() {
        let input = Builder::new()
            .read(b"POST /submit HTTP/1.0\r\n")
            .read(b"Content-Length: 3\r\n\r\n")
            .read(b"abc")
            .build();
        let output = Builder::new().write(RESPONSE).build();
        let mut reader = StreamReader::new(input, CancellationToken::new());

        reader.peek(12).await.unwrap();
        handle_request(&mut reader, output, RESPONSE).await.unwrap();
        assert_eq!(reader.buffered(), 0);
    }
}
