//! Incremental RESP Parser
//!
//! The parser works on a byte slice and reports one of three things:
//!
//! - `Ok(Some((value, consumed)))`: a full value was decoded from the first
//!   `consumed` bytes
//! - `Ok(None)`: the buffer ends mid-value, read more and try again
//! - `Err(ParseError)`: the bytes are not valid RESP
//!
//! The server uses it to decode client commands (including inline commands
//! typed into `telnet`/`redis-cli`), and the Redis client uses it to decode
//! replies.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Negative length other than the -1 null marker
    #[error("invalid length: {0}")]
    InvalidLength(i64),

    /// Missing CRLF, empty inline command, excessive nesting
    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth
pub const MAX_NESTING_DEPTH: usize = 32;

type Parsed = Option<(RespValue, usize)>;

/// A stateless-between-calls RESP parser.
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to decode one value from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Parsed> {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Parsed> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match first {
            prefix::SIMPLE_STRING => Ok(read_text(buf)?
                .map(|(s, used)| (RespValue::SimpleString(s), used))),
            prefix::ERROR => Ok(read_text(buf)?.map(|(s, used)| (RespValue::Error(s), used))),
            prefix::INTEGER => Ok(read_number(buf)?.map(|(n, used)| (RespValue::Integer(n), used))),
            prefix::BULK_STRING => parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            _ => parse_inline(buf),
        }
    }

    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Parsed> {
        let Some((count, header)) = read_number(buf)? else {
            return Ok(None);
        };

        if count == -1 {
            return Ok(Some((RespValue::Null, header)));
        }
        if count < 0 {
            return Err(ParseError::InvalidLength(count));
        }

        let mut elements = Vec::with_capacity((count as usize).min(1024));
        let mut consumed = header;

        self.depth += 1;
        for _ in 0..count {
            match self.parse_value(&buf[consumed..])? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }
        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

/// Reads the line after the prefix byte; returns it and the bytes consumed
/// (prefix + line + CRLF).
fn read_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    find_crlf(&buf[1..]).map(|pos| (&buf[1..1 + pos], pos + 3))
}

fn read_text(buf: &[u8]) -> ParseResult<Option<(String, usize)>> {
    let Some((line, used)) = read_line(buf) else {
        return Ok(None);
    };
    let s = std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    Ok(Some((s.to_string(), used)))
}

fn read_number(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    let Some((text, used)) = read_text(buf)? else {
        return Ok(None);
    };
    let n = text
        .parse::<i64>()
        .map_err(|e| ParseError::InvalidInteger(format!("{:?}: {}", text, e)))?;
    Ok(Some((n, used)))
}

fn parse_bulk_string(buf: &[u8]) -> ParseResult<Parsed> {
    let Some((length, header)) = read_number(buf)? else {
        return Ok(None);
    };

    if length == -1 {
        return Ok(Some((RespValue::Null, header)));
    }
    if length < 0 {
        return Err(ParseError::InvalidLength(length));
    }

    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let end = header + length;
    if buf.len() < end + 2 {
        return Ok(None);
    }
    if &buf[end..end + 2] != CRLF {
        return Err(ParseError::ProtocolError(
            "bulk string missing trailing CRLF".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[header..end]);
    Ok(Some((RespValue::BulkString(data), end + 2)))
}

/// Inline commands: `GETUSER alice\r\n` becomes an array of bulk strings.
fn parse_inline(buf: &[u8]) -> ParseResult<Parsed> {
    let Some(pos) = find_crlf(buf) else {
        return Ok(None);
    };

    let line = std::str::from_utf8(&buf[..pos]).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

    let elements: Vec<RespValue> = line
        .split_whitespace()
        .map(|part| RespValue::BulkString(Bytes::copy_from_slice(part.as_bytes())))
        .collect();

    if elements.is_empty() {
        return Err(ParseError::ProtocolError("empty inline command".to_string()));
    }

    Ok(Some((RespValue::Array(elements), pos + 2)))
}

#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Parses a single RESP message from bytes.
pub fn parse_message(buf: &[u8]) -> ParseResult<Parsed> {
    RespParser::new().parse(buf)
}
