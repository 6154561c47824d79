//! Command Module
//!
//! Sits between the protocol codec and the keyspace:
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │  Command::from_resp
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │──── BGREWRITEAOF ───> Persistence
//! │                 │
//! │  - Dispatch     │
//! │  - Validate     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`, `SET`, `GET`, `TTL`, `DEL`, `EXPIRE`
//! - `BGREWRITEAOF`

pub mod command;
pub mod error;
pub mod handler;

pub use command::Command;
pub use error::CommandError;
pub use handler::CommandHandler;
