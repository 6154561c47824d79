//! # CinderKV - An In-Memory Key-Value Server
//!
//! CinderKV keeps a keyspace of byte-string values in memory, expires keys
//! on their TTL, and can dump the keyspace to an append-only file on demand.
//! It speaks enough of the Redis protocol for `redis-cli` and client
//! libraries to talk to it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              CinderKV                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │──┐               │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │  │ BGREWRITEAOF  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘  ▼               │
//! │                                               │   ┌─────────────────┐   │
//! │                                               │   │  Persistence    │   │
//! │                                               ▼   │  ──> AofFile    │   │
//! │  ┌─────────────┐    ┌─────────────────────────────┴─────────────────┐   │
//! │  │   RESP      │    │              StorageEngine                    │   │
//! │  │   Parser    │    │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐  │   │
//! │  │             │    │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │...N    │  │   │
//! │  └─────────────┘    │  │RwLock  │ │RwLock  │ │RwLock  │ │shards  │  │   │
//! │                     │  └────────┘ └────────┘ └────────┘ └────────┘  │   │
//! │                     └───────────────────────────────────────────────┘   │
//! │                                               ▲                         │
//! │                     ┌─────────────────────────┴───────────────────────┐ │
//! │                     │      ExpirySweeper (optional, --active-expiry)  │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use cinderkv::commands::{Command, CommandHandler};
//! use cinderkv::persistence::{AofFile, Persistence};
//! use cinderkv::protocol::RespValue;
//! use cinderkv::storage::StorageEngine;
//! use std::sync::Arc;
//!
//! let storage = Arc::new(StorageEngine::new());
//! let persistence = Arc::new(Persistence::new(
//!     Arc::clone(&storage),
//!     AofFile::new("appendonly.aof"),
//! ));
//! let handler = CommandHandler::new(storage, persistence);
//!
//! let reply = handler.execute(&Command::new("SET", ["name", "Ariz"]));
//! assert_eq!(reply, RespValue::ok());
//!
//! let reply = handler.execute(&Command::new("GET", ["name"]));
//! assert_eq!(reply, RespValue::bulk_string("Ariz"));
//! ```
//!
//! ## Supported Commands
//!
//! - `PING [message]`
//! - `SET key value [EX seconds | PX milliseconds | EXAT unix-seconds | PXAT unix-ms]`
//! - `GET key`
//! - `TTL key`
//! - `DEL key [key ...]`
//! - `EXPIRE key seconds`
//! - `BGREWRITEAOF`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP codec
//! - [`storage`]: sharded keyspace with lazy expiry and snapshots
//! - [`commands`]: the command evaluator
//! - [`persistence`]: snapshot rewrites and AOF loading
//! - [`connection`]: per-client network loop
//! - [`config`]: command-line configuration
//!
//! ## Expiry
//!
//! Expiry times are absolute wall-clock milliseconds. A key whose time has
//! come is treated as absent by every command, whether or not it has been
//! physically removed yet. Reads remove such keys as they find them; the
//! optional sweeper reclaims the ones nobody reads.

pub mod commands;
pub mod config;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod storage;

pub use commands::{Command, CommandError, CommandHandler};
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use persistence::{load_aof, AofFile, Persistence, PersistenceError, SnapshotSink};
pub use protocol::{ParseError, RespParser, RespValue};
pub use storage::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper, StorageEngine};

/// The default port CinderKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host CinderKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
