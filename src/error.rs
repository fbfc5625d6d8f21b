//! Error types shared by the framed protocol, the stream reader and sessions.

use thiserror::Error;

/// Failures that end a framed session.
///
/// Anything that is not fatal to a session (unknown message types, malformed
/// `SEND` bodies, missing delivery targets) is not an error value: it is
/// either ignored or answered with an `ERROR` frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Peer closed the connection, or the read failed, before `expected`
    /// bytes arrived.
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    /// Header did not carry the protocol magic.
    #[error("bad magic: {0:#010x}")]
    BadMagic(u32),

    /// Declared body length is above the configured limit.
    #[error("frame body of {len} bytes exceeds limit of {max} bytes")]
    BodyTooLarge { len: usize, max: usize },

    /// The session was asked to stop while waiting on the peer.
    #[error("cancelled")]
    Cancelled,

    /// Write-side I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for framed-protocol operations.
pub type Result<T> = std::result::Result<T, FrameError>;
