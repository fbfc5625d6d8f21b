//! Per-connection state machine.
//!
//! ```text
//! Sniffing ──▶ FramedLoop ───┐
//!    │                       ├──▶ Closing ──▶ Closed
//!    └──────▶ FallbackOnce ──┘
//! ```
//!
//! A session owns its connection exclusively. It reaches other sessions
//! only through the [`Registry`], which routes frames onto their outbound
//! queues.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::error::{FrameError, Result};
use crate::protocols::fallback;
use crate::protocols::frame;
use crate::protocols::frame::codec::HEADER_SIZE;
use crate::protocols::sniff::{classify, Verdict};
use crate::reader::StreamReader;
use crate::registry::{IdLease, Registry};

/// Current state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for enough bytes to tell the protocols apart.
    Sniffing,
    /// Registered and serving framed requests.
    FramedLoop,
    /// Answering a single plain-text request.
    FallbackOnce,
    /// Deregistering and closing the connection.
    Closing,
    /// Terminal.
    Closed,
}

/// Settings and shared state handed to every session.
pub struct SessionContext {
    pub registry: Arc<Registry>,
    /// Reported for NAME queries.
    pub server_name: String,
    /// Body of the welcome frame.
    pub welcome: String,
    /// Written verbatim to fallback requests.
    pub fallback_response: Bytes,
    pub max_body_size: Option<usize>,
}

impl SessionContext {
    pub fn new(config: &Config, registry: Arc<Registry>) -> Self {
        Self {
            registry,
            server_name: config.server_name(),
            welcome: config.welcome.clone(),
            fallback_response: Bytes::from(config.fallback_response.clone()),
            max_body_size: config.max_body_size,
        }
    }
}

/// A single accepted connection.
pub struct Session {
    lease: IdLease,
    peer: SocketAddr,
    state: SessionState,
    context: Arc<SessionContext>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(
        lease: IdLease,
        peer: SocketAddr,
        context: Arc<SessionContext>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            lease,
            peer,
            state: SessionState::Sniffing,
            context,
            cancel,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        trace!(id = %self.lease.id(), from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }

    /// Drive the connection to `Closed`. Errors stay local to the session.
    pub async fn run(mut self, stream: TcpStream) {
        let id = self.lease.id();
        let (read_half, write_half) = stream.into_split();
        let mut reader = StreamReader::new(read_half, self.cancel.clone());

        let result = match sniff(&mut reader).await {
            Ok(Verdict::Framed) => {
                self.transition(SessionState::FramedLoop);
                frame::handle_session(
                    &mut reader,
                    write_half,
                    id,
                    self.peer,
                    &self.context,
                    &self.cancel,
                )
                .await
            }
            Ok(Verdict::Fallback) => {
                self.transition(SessionState::FallbackOnce);
                debug!(%id, peer = %self.peer, "Fallback request");
                fallback::handle_request(&mut reader, write_half, &self.context.fallback_response)
                    .await
            }
            Ok(Verdict::Unknown | Verdict::Indeterminate) => {
                warn!(%id, peer = %self.peer, "Unknown protocol, closing");
                Ok(())
            }
            Err(e) => Err(e),
        };

        self.transition(SessionState::Closing);
        match result {
            Ok(()) => {}
            Err(FrameError::ShortRead { .. }) => debug!(%id, "Peer disconnected"),
            Err(FrameError::Cancelled) => debug!(%id, "Session cancelled"),
            Err(e) => warn!(%id, peer = %self.peer, error = %e, "Closing session"),
        }

        self.context.registry.deregister(id);
        drop(reader);
        self.transition(SessionState::Closed);
        info!(%id, peer = %self.peer, "Connection closed");
    }
}

/// Peek until the leading bytes identify a protocol.
async fn sniff<R: AsyncRead + Unpin>(reader: &mut StreamReader<R>) -> Result<Verdict> {
    loop {
        let verdict = classify(reader.peek(HEADER_SIZE).await?);
        if verdict != Verdict::Indeterminate {
            return Ok(verdict);
        }
        reader.fill().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::frame::codec::{encode, MessageType};
    use tokio_test::io::Builder;

    fn reader(mock: tokio_test::io::Mock) -> StreamReader<tokio_test::io::Mock> {
        StreamReader::new(mock, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_sniff_framed_in_pieces() {
        let encoded = encode(MessageType::Time, b"");
        let mock = Builder::new()
            .read(&encoded[..2])
            .read(&encoded[2..7])
            .read(&encoded[7..])
            .build();
        let mut reader = reader(mock);

        assert_eq!(sniff(&mut reader).await.unwrap(), Verdict::Framed);
        // Nothing consumed.
        assert_eq!(reader.buffered(), HEADER_SIZE);
        reader.drain_buffered();
    }

    #[tokio::test]
    async fn test_sniff_fallback_before_full_header() {
        let mock = Builder::new().read(b"GE").read(b"T /").build();
        let mut reader = reader(mock);
        assert_eq!(sniff(&mut reader).await.unwrap(), Verdict::Fallback);
    }

    #[tokio::test]
    async fn test_sniff_unknown() {
        let mock = Builder::new().read(b"SSH-2.0-OpenSSH").build();
        let mut reader = reader(mock);
        assert_eq!(sniff(&mut reader).await.unwrap(), Verdict::Unknown);
    }

    #[tokio::test]
    async fn test_sniff_eof() {
        let mock = Builder::new().read(b"LA").build();
        let mut reader = reader(mock);
        assert!(matches!(
            sniff(&mut reader).await,
            Err(FrameError::ShortRead { .. })
        ));
    }

    #[test]
    fn test_new_session_starts_sniffing() {
        let registry = Registry::new();
        let context = Arc::new(SessionContext::new(
            &Config {
                name: Some("test-host".to_string()),
                ..Config::default()
            },
            Arc::clone(&registry),
        ));
        let session = Session::new(
            registry.lease(),
            "127.0.0.1:1".parse().unwrap(),
            context,
            CancellationToken::new(),
        );
        assert_eq!(session.state(), SessionState::Sniffing);
    }
}
