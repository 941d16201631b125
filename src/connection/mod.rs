//! Client connection handling.
//!
//! One task per accepted socket. The driver feeds the protocol parser from
//! its read buffer, executes requests in order through the command handler,
//! and writes pipelined replies back in batches.

pub mod handler;

pub use handler::{handle_connection, Connection, ConnectionError, ConnectionStats};
