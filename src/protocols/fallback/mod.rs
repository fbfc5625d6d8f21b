//! Plain-text fallback protocol.
//!
//! A connection whose first four bytes are `GET ` or `POST` is not speaking
//! the framed protocol. It gets one fixed reply and is then closed:
//!
//! ```text
//! Request:  GET / HTTP/1.0\r\n\r\n
//! Response: HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\n<text>
//! ```
//!
//! The reply is configurable and written verbatim.

pub mod handler;

pub use handler::handle_request;
