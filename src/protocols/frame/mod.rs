//! Length-framed binary protocol.
//!
//! Every frame is a fixed 12-byte header followed by a variable body:
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬─────────────────┐
//! │ Magic    │ Type     │ Length   │ Body            │
//! │ u32 BE   │ u32 BE   │ u32 BE   │ `length` bytes  │
//! └──────────┴──────────┴──────────┴─────────────────┘
//! ```
//!
//! Magic is `0x4C414237` (`"LAB7"`). A frame with any other magic closes
//! the connection.
//!
//! ## Message Types
//!
//! ```text
//! 0x01 CONNECT   request   (ignored)
//! 0x02 TIME      request   -> OK "<timestamp>"
//! 0x03 NAME      request   -> OK "<server name>"
//! 0x04 LIST      request   -> LIST "ID\tAddress\n..."
//! 0x05 SEND      "<id>:<text>" -> OK "Sent." | ERROR "<reason>"
//! 0x06 EXIT      request   (connection closed, no reply)
//! 0x10 OK        response
//! 0x11 ERROR     response
//! 0x12 LIST      response
//! 0x20 MESSAGE   indication "<source id>|<text>"
//! ```
//!
//! Unknown types are logged and skipped; they never end a session.

pub mod codec;
pub mod handler;

pub use handler::handle_session;
