//! RESP Reply and Request Values
//!
//! Every RESP value starts with a one-byte type prefix and ends with CRLF:
//!
//! | Prefix | Type          | Example                    |
//! |--------|---------------|----------------------------|
//! | `+`    | Simple string | `+OK\r\n`                  |
//! | `-`    | Error         | `-ERR syntax error\r\n`    |
//! | `:`    | Integer       | `:-2\r\n`                  |
//! | `$`    | Bulk string   | `$5\r\nhello\r\n`          |
//! | `*`    | Array         | `*1\r\n$4\r\nPING\r\n`     |
//!
//! The null bulk string `$-1\r\n` is how "no value" travels. It is never
//! confused with `:0\r\n` or with the empty bulk string `$0\r\n\r\n`.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// The CRLF terminator used by every RESP frame.
pub const CRLF: &[u8] = b"\r\n";

/// RESP type prefixes.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A single RESP value, used both for decoded requests and encoded replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status reply, e.g. `OK` or `PONG`. Must not contain CRLF.
    SimpleString(String),

    /// Error reply, rendered as `-<message>\r\n`.
    Error(String),

    /// Signed 64-bit integer reply.
    Integer(i64),

    /// Binary-safe string.
    BulkString(Bytes),

    /// Absent value (`$-1\r\n`).
    Null,

    /// Ordered collection of values. Requests arrive as arrays of bulk strings.
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// The `+OK` acknowledgement.
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Builds a request array out of bulk strings, e.g. `["SET", "k", "v"]`.
    pub fn command<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        RespValue::Array(
            parts
                .into_iter()
                .map(|p| RespValue::BulkString(p.into()))
                .collect(),
        )
    }

    /// Encodes the value into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Appends the wire form of this value to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => {
                buf.put_u8(prefix::SIMPLE_STRING);
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Error(msg) => {
                buf.put_u8(prefix::ERROR);
                buf.put_slice(msg.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Integer(n) => {
                buf.put_u8(prefix::INTEGER);
                buf.put_slice(n.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::BulkString(data) => {
                buf.put_u8(prefix::BULK_STRING);
                buf.put_slice(data.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            RespValue::Null => buf.put_slice(b"$-1\r\n"),
            RespValue::Array(values) => {
                buf.put_u8(prefix::ARRAY);
                buf.put_slice(values.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for value in values {
                    value.encode(buf);
                }
            }
        }
    }

    /// Returns the payload of a bulk or simple string.
    pub fn as_bytes(&self) -> Option<Bytes> {
        match self {
            RespValue::BulkString(b) => Some(b.clone()),
            RespValue::SimpleString(s) => Some(Bytes::from(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "{}", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(values) => {
                if values.is_empty() {
                    return write!(f, "(empty array)");
                }
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, v)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_error_encoding() {
        assert_eq!(&RespValue::ok().to_bytes()[..], b"+OK\r\n");
        assert_eq!(&RespValue::pong().to_bytes()[..], b"+PONG\r\n");
        assert_eq!(
            &RespValue::error("ERR syntax error").to_bytes()[..],
            b"-ERR syntax error\r\n"
        );
    }

    #[test]
    fn test_ttl_sentinels_encode_as_integers() {
        assert_eq!(&RespValue::integer(-1).to_bytes()[..], b":-1\r\n");
        assert_eq!(&RespValue::integer(-2).to_bytes()[..], b":-2\r\n");
    }

    #[test]
    fn test_absent_zero_and_empty_are_distinct() {
        let null = RespValue::null().to_bytes();
        let zero = RespValue::integer(0).to_bytes();
        let empty = RespValue::bulk_string(Bytes::new()).to_bytes();
        let error = RespValue::error("ERR").to_bytes();

        assert_eq!(&null[..], b"$-1\r\n");
        assert_eq!(&zero[..], b":0\r\n");
        assert_eq!(&empty[..], b"$0\r\n\r\n");
        assert_ne!(null, zero);
        assert_ne!(null, empty);
        assert_ne!(null, error);
    }

    #[test]
    fn test_command_array_encoding() {
        let value = RespValue::command(["GET", "name"]);
        assert_eq!(&value.to_bytes()[..], b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
    }

    #[test]
    fn test_encode_appends_in_order() {
        let mut buf = BytesMut::new();
        RespValue::ok().encode(&mut buf);
        RespValue::bulk_string("2").encode(&mut buf);
        assert_eq!(&buf[..], b"+OK\r\n$1\r\n2\r\n");
    }
}
