//! Protocol detection on the first bytes of a connection.

use super::frame::codec::{HEADER_SIZE, MAGIC};

/// Request prefixes answered by the fallback protocol. Matched case-sensitively.
pub const FALLBACK_PREFIXES: [&[u8; 4]; 2] = [b"GET ", b"POST"];

/// Number of bytes needed before any verdict is possible.
const PREFIX_LEN: usize = 4;

/// Classification of a connection from its peeked leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Starts with the protocol magic and a full header is available.
    Framed,
    /// Starts with a fallback request prefix.
    Fallback,
    /// Too few bytes to decide; peek again after more data arrives.
    Indeterminate,
    /// Neither protocol. Close without replying.
    Unknown,
}

/// Classify a connection from its first bytes.
///
/// Fallback prefixes are checked before the header length requirement,
/// since a fallback request is not guaranteed to ever reach 12 bytes.
pub fn classify(peeked: &[u8]) -> Verdict {
    if peeked.len() < PREFIX_LEN {
        return Verdict::Indeterminate;
    }

    let prefix = &peeked[..PREFIX_LEN];
    if FALLBACK_PREFIXES.iter().any(|p| prefix == &p[..]) {
        return Verdict::Fallback;
    }

    if prefix == &MAGIC.to_be_bytes()[..] {
        // Magic matched; wait for the rest of the header.
        return if peeked.len() >= HEADER_SIZE {
            Verdict::Framed
        } else {
            Verdict::Indeterminate
        };
    }

    Verdict::Unknown
}
