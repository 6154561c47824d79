//! Connection Module
//!
//! One async task per client. The listener in `main.rs` accepts sockets and
//! hands each to [`handle_connection`]:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ accept() + spawn
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────────┐  │
//! │  │ Read bytes  │───>│ Decode all  │───>│ execute_batch   │  │
//! │  └─────────────┘    │  complete   │    └────────┬────────┘  │
//! │                     └─────────────┘             ▼           │
//! │                                       ┌─────────────────┐   │
//! │                                       │ write + flush   │   │
//! │                                       └─────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
