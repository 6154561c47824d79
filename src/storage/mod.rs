//! Storage Engine Module
//!
//! The keyspace and everything that decides whether a key is present:
//!
//! - [`object`]: values and their absolute expiry timestamps
//! - [`clock`]: where "now" comes from
//! - [`engine`]: the sharded, lock-protected keyspace with lazy expiry and
//!   point-in-time snapshots
//! - [`expiry`]: an optional background sweeper that reclaims memory held
//!   by expired keys
//!
//! ## Example
//!
//! ```
//! use cinderkv::storage::{ManualClock, StorageEngine};
//! use bytes::Bytes;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let engine = StorageEngine::with_clock(clock.clone());
//!
//! engine.set_with_ttl(Bytes::from("session"), "token123", Duration::from_secs(1));
//! assert!(engine.get(b"session").is_some());
//!
//! clock.advance(Duration::from_secs(1));
//! assert!(engine.get(b"session").is_none());
//! ```

pub mod clock;
pub mod engine;
pub mod expiry;
pub mod object;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{Snapshot, StorageEngine, StorageStats};
pub use expiry::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper};
pub use object::{Object, Value};
