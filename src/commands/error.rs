//! Errors a single command can produce.
//!
//! All of them are local to the command: the reply carries the error, the
//! keyspace is left as it was, and the rest of the batch still runs.

use crate::persistence::PersistenceError;
use crate::protocol::RespValue;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Holds the lower-case command name.
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(&'static str),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR Background append only file rewriting already in progress")]
    RewriteInProgress,

    #[error("ERR append only file rewrite failed: {0}")]
    Persistence(String),

    #[error("ERR Protocol error: {0}")]
    InvalidRequest(&'static str),
}

impl From<PersistenceError> for CommandError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::RewriteInProgress => CommandError::RewriteInProgress,
            other => CommandError::Persistence(other.to_string()),
        }
    }
}

impl From<CommandError> for RespValue {
    fn from(e: CommandError) -> Self {
        RespValue::Error(e.to_string())
    }
}
