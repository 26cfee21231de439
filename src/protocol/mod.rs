//! RESP Protocol
//!
//! Shared by the server side (decoding user-API commands from clients) and
//! the client side (talking to a Redis-compatible backing store).
//!
//! - `types`: the `RespValue` enum and its serialization
//! - `parser`: incremental parser for incoming bytes

pub mod parser;
pub mod types;

pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
