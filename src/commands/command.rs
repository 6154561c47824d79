//! The parsed request record handed to the evaluator.

use crate::commands::error::CommandError;
use crate::protocol::RespValue;
use bytes::Bytes;

/// A command name plus its raw arguments.
///
/// The name is kept as the client sent it; dispatch compares it
/// case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<Bytes>,
}

impl Command {
    pub fn new<I, T>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Converts a decoded request array into a command.
    pub fn from_resp(value: RespValue) -> Result<Self, CommandError> {
        let RespValue::Array(parts) = value else {
            return Err(CommandError::InvalidRequest("expected an array of bulk strings"));
        };

        let mut parts = parts.into_iter().map(|p| {
            p.as_bytes()
                .ok_or(CommandError::InvalidRequest("expected an array of bulk strings"))
        });

        let name = match parts.next() {
            Some(name) => String::from_utf8_lossy(&name?).into_owned(),
            None => return Err(CommandError::InvalidRequest("empty command")),
        };
        let args = parts.collect::<Result<Vec<_>, _>>()?;

        Ok(Self { name, args })
    }
}
