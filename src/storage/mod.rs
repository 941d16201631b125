//! Keyspace storage.
//!
//! [`engine`] owns all key→value state and the command semantics over it;
//! [`expiry`] is the background task that reclaims expired keys nobody
//! touches. Expirations are absolute unix-millisecond deadlines checked
//! lazily on every access.

pub mod engine;
pub mod expiry;

pub use engine::{
    Entry, ExpireCondition, SetCondition, SetOptions, SetOutcome, StorageEngine, StoreError, Value,
};
pub use expiry::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper};
