//! RESP protocol codec.
//!
//! [`frame`] holds the value type and the reply encoder; [`parser`] holds the
//! streaming request parser with its framing limits. Requests come in as
//! arrays of bulk strings and leave as whichever [`Frame`] variant the
//! command produced.

pub mod frame;
pub mod parser;

pub use frame::{Frame, InvalidRequest};
pub use parser::{ParseError, Parser, ProtocolLimits};
