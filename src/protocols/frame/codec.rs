//! Framed protocol encoder and header decoder.
//!
//! Pure transforms, no I/O. Reading frames off a socket lives in
//! [`crate::reader`].

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::error::{FrameError, Result};

/// Protocol magic, ASCII `"LAB7"` in network byte order.
pub const MAGIC: u32 = 0x4C41_4237;

/// Header size in bytes: magic, type and length, each a big-endian `u32`.
pub const HEADER_SIZE: usize = 12;

/// Message type codes carried in the header.
///
/// Conversion from `u32` is total: codes this server does not know about
/// decode to [`MessageType::Unknown`] and are ignored by the session rather
/// than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Handshake request. Accepted and ignored.
    Connect,
    /// Current time query.
    Time,
    /// Server name query.
    Name,
    /// Roster query.
    List,
    /// Relay a message to another client. Body: `<targetId>:<text>`.
    Send,
    /// Close the session.
    Exit,
    /// Generic success response.
    Ok,
    /// Generic failure response.
    Error,
    /// Roster response.
    ListResponse,
    /// Relayed message. Body: `<sourceId>|<text>`.
    Message,
    /// Any code not listed above.
    Unknown(u32),
}

impl MessageType {
    pub const fn code(self) -> u32 {
        match self {
            MessageType::Connect => 0x01,
            MessageType::Time => 0x02,
            MessageType::Name => 0x03,
            MessageType::List => 0x04,
            MessageType::Send => 0x05,
            MessageType::Exit => 0x06,
            MessageType::Ok => 0x10,
            MessageType::Error => 0x11,
            MessageType::ListResponse => 0x12,
            MessageType::Message => 0x20,
            MessageType::Unknown(code) => code,
        }
    }
}

impl From<u32> for MessageType {
    fn from(code: u32) -> Self {
        match code {
            0x01 => MessageType::Connect,
            0x02 => MessageType::Time,
            0x03 => MessageType::Name,
            0x04 => MessageType::List,
            0x05 => MessageType::Send,
            0x06 => MessageType::Exit,
            0x10 => MessageType::Ok,
            0x11 => MessageType::Error,
            0x12 => MessageType::ListResponse,
            0x20 => MessageType::Message,
            other => MessageType::Unknown(other),
        }
    }
}

impl From<MessageType> for u32 {
    fn from(msg_type: MessageType) -> Self {
        msg_type.code()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Unknown(code) => write!(f, "unknown({code:#x})"),
            known => write!(f, "{known:?}({:#x})", known.code()),
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub msg_type: MessageType,
    /// Body length in bytes.
    pub length: u32,
}

/// Decode a header, validating only the magic.
pub fn decode_header(buf: &[u8; HEADER_SIZE]) -> Result<Header> {
    let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != MAGIC {
        return Err(FrameError::BadMagic(magic));
    }
    let msg_type = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let length = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

    Ok(Header {
        magic,
        msg_type: MessageType::from(msg_type),
        length,
    })
}

/// Encode a header followed by `body`. `body` must fit a `u32` length.
pub fn encode(msg_type: MessageType, body: &[u8]) -> Bytes {
    debug_assert!(body.len() <= u32::MAX as usize);
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
    buf.put_u32(MAGIC);
    buf.put_u32(msg_type.code());
    buf.put_u32(body.len() as u32);
    buf.extend_from_slice(body);
    buf.freeze()
}

/// One complete header + body unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: MessageType,
    pub body: Bytes,
}

impl Frame {
    pub fn new(msg_type: MessageType, body: impl Into<Bytes>) -> Self {
        Self {
            msg_type,
            body: body.into(),
        }
    }

    /// `RES_OK` with a human-readable body.
    pub fn ok(text: impl Into<String>) -> Self {
        Self::new(MessageType::Ok, text.into())
    }

    /// `RES_ERROR` with a human-readable reason.
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(MessageType::Error, text.into())
    }

    /// `RES_LIST` carrying a rendered roster.
    pub fn list(roster: impl Into<String>) -> Self {
        Self::new(MessageType::ListResponse, roster.into())
    }

    /// `IND_RECV_MSG` relaying `message` from `source`. The message bytes
    /// are passed through untouched.
    pub fn indication(source: impl fmt::Display, message: impl AsRef<[u8]>) -> Self {
        let prefix = format!("{source}|");
        let message = message.as_ref();
        let mut body = BytesMut::with_capacity(prefix.len() + message.len());
        body.extend_from_slice(prefix.as_bytes());
        body.extend_from_slice(message);
        Self::new(MessageType::Message, body.freeze())
    }

    pub fn encode(&self) -> Bytes {
        encode(self.msg_type, &self.body)
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_of(encoded: &[u8]) -> [u8; HEADER_SIZE] {
        encoded[..HEADER_SIZE].try_into().unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let encoded = encode(MessageType::Time, b"");
        assert_eq!(
            &encoded[..],
            &[0x4C, 0x41, 0x42, 0x37, 0, 0, 0, 0x02, 0, 0, 0, 0]
        );

        let encoded = encode(MessageType::Ok, b"hi");
        assert_eq!(encoded.len(), HEADER_SIZE + 2);
        assert_eq!(&encoded[8..12], &[0, 0, 0, 2]);
        assert_eq!(&encoded[12..], b"hi");
    }

    #[test]
    fn test_header_round_trip() {
        let body = b"7:hello there";
        let encoded = encode(MessageType::Send, body);
        let header = decode_header(&header_of(&encoded)).unwrap();

        assert_eq!(
            header,
            Header {
                magic: MAGIC,
                msg_type: MessageType::Send,
                length: body.len() as u32,
            }
        );
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = header_of(&encode(MessageType::Time, b""));
        buf[0] = b'G';
        match decode_header(&buf) {
            Err(FrameError::BadMagic(magic)) => assert_eq!(magic, 0x4741_4237),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_decodes() {
        let encoded = encode(MessageType::Unknown(0x7f), b"");
        let header = decode_header(&header_of(&encoded)).unwrap();
        assert_eq!(header.msg_type, MessageType::Unknown(0x7f));
        assert_eq!(u32::from(header.msg_type), 0x7f);
    }

    #[test]
    fn test_message_type_codes() {
        for code in [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x10, 0x11, 0x12, 0x20] {
            let msg_type = MessageType::from(code);
            assert!(!matches!(msg_type, MessageType::Unknown(_)));
            assert_eq!(msg_type.code(), code);
        }
    }

    #[test]
    fn test_indication_body() {
        let frame = Frame::indication(3, "hello");
        assert_eq!(frame.msg_type, MessageType::Message);
        assert_eq!(frame.text(), "3|hello");

        let frame = Frame::indication(12, b"\xC4\xE3\xBA\xC3");
        assert_eq!(&frame.body[..], b"12|\xC4\xE3\xBA\xC3");
    }
}
