//! # mirdb - An In-Memory Key-Value Store with Snapshot Persistence
//!
//! mirdb is a single-node, Redis-compatible key-value server written in
//! Rust. Clients speak RESP over TCP: commands arrive as arrays of bulk
//! strings and replies leave as simple strings, errors, integers, bulk
//! strings, arrays or nulls.
//!
//! ## Features
//!
//! - **String and list values** with the usual command families
//!   (SET/GET/INCR..., LPUSH/LRANGE/LPOP...)
//! - **Millisecond expirations**: EXPIRE/PEXPIRE/EXPIREAT/PEXPIREAT with
//!   NX/XX/GT/LT conditions, lazy expiry on access plus a background sweeper
//! - **Snapshot persistence**: SAVE/LOAD serialize the whole keyspace to an
//!   MRDB file, atomically on the way out and staged on the way in
//! - **Strict protocol limits** with precise error replies, and pipelining
//!   with replies in request order
//!
//! ## Architecture
//!
//! ```text
//! bytes ──> protocol::Parser ──> Frame ──> CommandHandler ──> StorageEngine
//!                                              │                   │
//!                                              └──> snapshot <─────┘
//!                                                   (SAVE/LOAD)
//! reply <── Frame::encode_into <── reply frame <──┘
//! ```
//!
//! The connection driver owns the buffers on both sides; the keyspace sits
//! behind one lock, so every command is atomic against every other.
//!
//! ## Module overview
//!
//! - [`protocol`]: RESP frames, the streaming parser and its framing limits
//! - [`commands`]: command registry, arity checking and handlers
//! - [`storage`]: the keyspace engine and the TTL sweeper
//! - [`snapshot`]: MRDB snapshot save/load
//! - [`connection`]: per-client buffering, pipelining and error policy
//! - [`clock`]: the wall-clock source used for every deadline

pub mod clock;
pub mod commands;
pub mod connection;
pub mod protocol;
pub mod snapshot;
pub mod storage;

pub use commands::CommandHandler;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{Frame, ParseError, Parser, ProtocolLimits};
pub use snapshot::DEFAULT_SNAPSHOT_PATH;
pub use storage::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper, StorageEngine};

/// The default port the server listens on.
pub const DEFAULT_PORT: u16 = 6379;

/// The default host the server binds to.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Crate version, as reported by `--version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
