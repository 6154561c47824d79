//! Incremental RESP Request Decoder
//!
//! TCP delivers a byte stream, so a read may hold half a command or several
//! pipelined ones. The parser therefore reports one of three outcomes:
//!
//! - `Ok(Some((value, consumed)))`: a full value was decoded from the first
//!   `consumed` bytes of the buffer
//! - `Ok(None)`: the buffer ends mid-value, read more and retry
//! - `Err(ParseError)`: the bytes can never form a valid value
//!
//! Lines that do not start with a RESP prefix are treated as inline commands
//! (`PING\r\n`, `SET a 1\r\n`), which is what `telnet`-style clients send.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors raised for malformed protocol input.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Largest accepted bulk string (512 MB).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Deepest accepted array nesting.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Stateless apart from the nesting guard; one parser per connection.
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Decodes the first complete value in `buf`.
    ///
    /// Blank lines in front of the value are skipped and counted as consumed.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        let skipped = skip_blank_lines(buf);
        Ok(self
            .parse_value(&buf[skipped..])?
            .map(|(value, consumed)| (value, skipped + consumed)))
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
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
            prefix::SIMPLE_STRING => Ok(read_line(&buf[1..])?
                .map(|(s, n)| (RespValue::SimpleString(s.to_string()), n + 1))),
            prefix::ERROR => {
                Ok(read_line(&buf[1..])?.map(|(s, n)| (RespValue::Error(s.to_string()), n + 1)))
            }
            prefix::INTEGER => {
                Ok(read_integer(&buf[1..])?.map(|(v, n)| (RespValue::Integer(v), n + 1)))
            }
            prefix::BULK_STRING => self.parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            _ => self.parse_inline(buf),
        }
    }

    /// `$<len>\r\n<data>\r\n`, or `$-1\r\n` for null.
    fn parse_bulk_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some((len, header)) = read_integer(&buf[1..])? else {
            return Ok(None);
        };
        let start = header + 1;

        if len == -1 {
            return Ok(Some((RespValue::Null, start)));
        }
        if len < 0 {
            return Err(ParseError::InvalidBulkLength(len));
        }

        let len = len as usize;
        if len > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: len,
                max: MAX_BULK_SIZE,
            });
        }

        let end = start + len;
        if buf.len() < end + CRLF.len() {
            return Ok(None);
        }
        if &buf[end..end + CRLF.len()] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[start..end]);
        Ok(Some((RespValue::BulkString(data), end + CRLF.len())))
    }

    /// `*<count>\r\n<element>...`, or `*-1\r\n` for null.
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some((count, header)) = read_integer(&buf[1..])? else {
            return Ok(None);
        };
        let mut consumed = header + 1;

        if count == -1 {
            return Ok(Some((RespValue::Null, consumed)));
        }
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        // The count is untrusted, so cap the preallocation.
        let mut elements = Vec::with_capacity((count as usize).min(1024));

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

    fn parse_inline(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some((line, consumed)) = read_line(buf)? else {
            return Ok(None);
        };

        let parts: Vec<RespValue> = line
            .split_whitespace()
            .map(|s| RespValue::BulkString(Bytes::copy_from_slice(s.as_bytes())))
            .collect();

        if parts.is_empty() {
            return Err(ParseError::ProtocolError("empty inline command".to_string()));
        }

        Ok(Some((RespValue::Array(parts), consumed)))
    }
}

/// Length of the run of whitespace-only lines at the start of `buf`.
fn skip_blank_lines(buf: &[u8]) -> usize {
    let mut skipped = 0;
    while let Some(pos) = buf[skipped..].windows(2).position(|w| w == CRLF) {
        if !buf[skipped..skipped + pos].iter().all(u8::is_ascii_whitespace) {
            break;
        }
        skipped += pos + CRLF.len();
    }
    skipped
}

/// Reads up to the first CRLF. Returns the line and the bytes consumed
/// including the terminator.
fn read_line(buf: &[u8]) -> ParseResult<Option<(&str, usize)>> {
    let Some(pos) = buf.windows(2).position(|w| w == CRLF) else {
        return Ok(None);
    };
    let line =
        std::str::from_utf8(&buf[..pos]).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    Ok(Some((line, pos + CRLF.len())))
}

fn read_integer(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    let Some((line, consumed)) = read_line(buf)? else {
        return Ok(None);
    };
    let n = line
        .parse::<i64>()
        .map_err(|_| ParseError::InvalidInteger(line.to_string()))?;
    Ok(Some((n, consumed)))
}

/// Decodes a single value with a throwaway parser.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}
