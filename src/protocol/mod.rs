//! RESP Protocol
//!
//! The wire codec around the core: `parser` turns client bytes into
//! [`RespValue`] requests, and [`RespValue::encode`] turns replies back into
//! bytes.
//!
//! ## Example
//!
//! ```
//! use cinderkv::protocol::{parse_message, RespValue};
//!
//! let (request, consumed) = parse_message(b"*1\r\n$4\r\nPING\r\n").unwrap().unwrap();
//! assert_eq!(request, RespValue::command(["PING"]));
//! assert_eq!(consumed, 14);
//!
//! assert_eq!(&RespValue::pong().to_bytes()[..], b"+PONG\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
