//! Protocol implementations sharing the listening port.
//!
//! - `frame`: length-framed binary protocol (requests, responses, relayed messages)
//! - `fallback`: plain-text requests answered with one canned reply
//! - `sniff`: decides which of the two a new connection speaks

pub mod fallback;
pub mod frame;
pub mod sniff;
