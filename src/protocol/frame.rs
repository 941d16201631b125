//! RESP frame type and wire encoder.
//!
//! A [`Frame`] is one unit of the protocol, on either side of the wire:
//! requests arrive as arrays of bulk strings, replies leave as whichever
//! variant the command produced.
//!
//! ## Wire format
//!
//! Simple string: `+OK\r\n`
//! Error: `-ERR unknown command\r\n`
//! Integer: `:1000\r\n`
//! Bulk string: `$5\r\nhello\r\n` (null: `$-1\r\n`)
//! Array: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n` (null: `*-1\r\n`)

use bytes::Bytes;
use thiserror::Error;

/// The CRLF terminator used throughout the protocol.
pub const CRLF: &[u8] = b"\r\n";

/// RESP type prefix bytes.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A single RESP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Non-binary-safe string without CRLF, e.g. `+OK`.
    Simple(String),
    /// Error reply, e.g. `-ERR syntax error`.
    Error(String),
    /// Signed 64-bit integer.
    Integer(i64),
    /// Binary-safe, length-prefixed string.
    Bulk(Bytes),
    /// Null bulk string (`$-1`).
    Null,
    /// Null array (`*-1`).
    NullArray,
    /// Array of frames.
    Array(Vec<Frame>),
}

/// A well-framed message that is not a legal client request.
///
/// Clients must send requests as arrays of bulk strings; anything else is
/// reported back to them without tearing down the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Protocol error: expected array of bulk strings")]
pub struct InvalidRequest;

impl Frame {
    /// The `+OK` reply shared by SET, LSET, SAVE and LOAD.
    pub fn ok() -> Self {
        Frame::Simple("OK".to_string())
    }

    pub fn simple(s: impl Into<String>) -> Self {
        Frame::Simple(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        Frame::Error(s.into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::Bulk(data.into())
    }

    /// Returns true if this frame is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }

    /// Interprets this frame as a client request.
    ///
    /// Returns the argument vector when the frame is an array of bulk
    /// strings (possibly empty), and [`InvalidRequest`] for every other
    /// shape, null arrays included.
    pub fn into_request(self) -> Result<Vec<Bytes>, InvalidRequest> {
        let items = match self {
            Frame::Array(items) => items,
            _ => return Err(InvalidRequest),
        };

        items
            .into_iter()
            .map(|frame| match frame {
                Frame::Bulk(arg) => Ok(arg),
                _ => Err(InvalidRequest),
            })
            .collect()
    }

    /// Encodes this frame to its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Appends the wire representation of this frame to `buf`.
    ///
    /// Replies for a pipelined batch are accumulated in one buffer and
    /// written out together.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Frame::Simple(s) => {
                buf.push(prefix::SIMPLE_STRING);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Frame::Error(s) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Frame::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Frame::Bulk(data) => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            Frame::Null => {
                buf.extend_from_slice(b"$-1");
                buf.extend_from_slice(CRLF);
            }
            Frame::NullArray => {
                buf.extend_from_slice(b"*-1");
                buf.extend_from_slice(CRLF);
            }
            Frame::Array(items) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(items.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for item in items {
                    item.encode_into(buf);
                }
            }
        }
    }
}
