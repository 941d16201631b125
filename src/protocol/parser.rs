//! Streaming RESP request parser.
//!
//! The parser consumes bytes incrementally and returns either:
//! - `Ok(Some((frame, consumed)))` - a complete frame, `consumed` bytes used
//! - `Ok(None)` - the buffer holds only a partial frame, read more
//! - `Err(ParseError)` - the stream is unframable from here on
//!
//! The caller appends network data to a buffer, calls [`Parser::parse`], and
//! on success advances the buffer by `consumed`. Parsing always restarts from
//! the beginning of the buffer, so no state is carried between calls.
//!
//! Every [`ParseError`] is fatal: once framing is lost there is no way to
//! find the start of the next message, so the connection must be closed
//! after the error reply is flushed. A syntactically valid frame that is not
//! a legal request (e.g. a top-level integer) is NOT a parse error; that
//! distinction lives in [`Frame::into_request`].
//!
//! [`Frame::into_request`]: crate::protocol::Frame::into_request

use crate::protocol::frame::{prefix, Frame};
use bytes::Bytes;
use thiserror::Error;

/// Framing limits enforced by the parser.
///
/// The field names are part of the external contract: the corresponding
/// error replies quote them verbatim.
#[derive(Debug, Clone)]
pub struct ProtocolLimits {
    /// Maximum declared length of a single bulk string.
    pub max_bulk_len: usize,
    /// Maximum declared element count of an array.
    pub max_array_len: usize,
    /// Maximum array nesting depth.
    pub max_nesting: usize,
    /// Maximum length of any CRLF-terminated line, terminated or not.
    pub max_inline_len: usize,
}

impl Default for ProtocolLimits {
    fn default() -> Self {
        Self {
            max_bulk_len: 512 * 1024 * 1024,
            max_array_len: 1024 * 1024,
            max_nesting: 128,
            max_inline_len: 64 * 1024,
        }
    }
}

/// Fatal framing errors. The `Display` text is the wire reply minus the
/// leading `ERR `.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Protocol error: unknown prefix")]
    UnknownPrefix,

    #[error("Protocol error: missing bulk length")]
    MissingBulkLength,

    #[error("Protocol error: invalid bulk length")]
    InvalidBulkLength,

    #[error("Protocol error: bad bulk string encoding")]
    BadBulkEncoding,

    #[error("Protocol error: missing integer")]
    MissingInteger,

    #[error("Protocol error: invalid integer")]
    InvalidInteger,

    #[error("Protocol error: missing array length")]
    MissingArrayLength,

    #[error("Protocol error: invalid array length")]
    InvalidArrayLength,

    #[error("Protocol error: bulk length exceeds proto_max_bulk_len")]
    BulkLengthExceeded,

    #[error("Protocol error: array length exceeds proto_max_array_len")]
    ArrayLengthExceeded,

    #[error("Protocol error: array nesting exceeds proto_max_nesting")]
    NestingExceeded,

    #[error("Protocol error: inline length exceeds proto_max_inline_len")]
    InlineLengthExceeded,
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// A streaming RESP parser.
///
/// # Example
///
/// ```
/// use mirdb::protocol::Parser;
/// use bytes::{Buf, BytesMut};
///
/// let parser = Parser::new();
/// let mut buffer = BytesMut::from(&b"*1\r\n$4\r\nPING\r\n"[..]);
///
/// let (frame, consumed) = parser.parse(&buffer).unwrap().unwrap();
/// buffer.advance(consumed);
/// let argv = frame.into_request().unwrap();
/// assert_eq!(&argv[0][..], b"PING");
/// ```
#[derive(Debug, Default)]
pub struct Parser {
    limits: ProtocolLimits,
}

impl Parser {
    /// Creates a parser with the default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a parser with custom limits.
    pub fn with_limits(limits: ProtocolLimits) -> Self {
        Self { limits }
    }

    /// Attempts to parse one frame from the start of `buf`.
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        self.parse_frame(buf, 0)
    }

    fn parse_frame(&self, buf: &[u8], depth: usize) -> ParseResult<Option<(Frame, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        match buf[0] {
            prefix::SIMPLE_STRING => self.parse_simple(buf, false),
            prefix::ERROR => self.parse_simple(buf, true),
            prefix::INTEGER => self.parse_integer(buf),
            prefix::BULK_STRING => self.parse_bulk(buf),
            prefix::ARRAY => self.parse_array(buf, depth),
            _ => Err(ParseError::UnknownPrefix),
        }
    }

    /// Parses `+<s>\r\n` or `-<s>\r\n`.
    fn parse_simple(&self, buf: &[u8], is_error: bool) -> ParseResult<Option<(Frame, usize)>> {
        let (line, consumed) = match self.read_line(&buf[1..])? {
            Some(found) => found,
            None => return Ok(None),
        };

        let text = String::from_utf8_lossy(line).into_owned();
        let frame = if is_error {
            Frame::Error(text)
        } else {
            Frame::Simple(text)
        };
        Ok(Some((frame, 1 + consumed)))
    }

    /// Parses `:<n>\r\n`.
    fn parse_integer(&self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        let (line, consumed) = match self.read_line(&buf[1..])? {
            Some(found) => found,
            None => return Ok(None),
        };

        if line.is_empty() {
            return Err(ParseError::MissingInteger);
        }
        let n = parse_header_int(line).ok_or(ParseError::InvalidInteger)?;
        Ok(Some((Frame::Integer(n), 1 + consumed)))
    }

    /// Parses `$<len>\r\n<len bytes>\r\n` (null bulk: `$-1\r\n`).
    fn parse_bulk(&self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        let (line, header_len) = match self.read_line(&buf[1..])? {
            Some(found) => found,
            None => return Ok(None),
        };

        if line.is_empty() {
            return Err(ParseError::MissingBulkLength);
        }
        let declared = parse_header_int(line).ok_or(ParseError::InvalidBulkLength)?;

        if declared == -1 {
            return Ok(Some((Frame::Null, 1 + header_len)));
        }
        if declared < 0 {
            return Err(ParseError::InvalidBulkLength);
        }
        let len = declared as usize;
        if len > self.limits.max_bulk_len {
            return Err(ParseError::BulkLengthExceeded);
        }

        let data_start = 1 + header_len;
        let total = data_start + len + 2;
        if buf.len() < total {
            return Ok(None);
        }

        if &buf[data_start + len..total] != b"\r\n" {
            return Err(ParseError::BadBulkEncoding);
        }

        let data = Bytes::copy_from_slice(&buf[data_start..data_start + len]);
        Ok(Some((Frame::Bulk(data), total)))
    }

    /// Parses `*<n>\r\n<elements...>` (null array: `*-1\r\n`).
    fn parse_array(&self, buf: &[u8], depth: usize) -> ParseResult<Option<(Frame, usize)>> {
        if depth >= self.limits.max_nesting {
            return Err(ParseError::NestingExceeded);
        }

        let (line, header_len) = match self.read_line(&buf[1..])? {
            Some(found) => found,
            None => return Ok(None),
        };

        if line.is_empty() {
            return Err(ParseError::MissingArrayLength);
        }
        let declared = parse_header_int(line).ok_or(ParseError::InvalidArrayLength)?;

        if declared == -1 {
            return Ok(Some((Frame::NullArray, 1 + header_len)));
        }
        if declared < 0 {
            return Err(ParseError::InvalidArrayLength);
        }
        let count = declared as usize;
        if count > self.limits.max_array_len {
            return Err(ParseError::ArrayLengthExceeded);
        }

        let mut items = Vec::with_capacity(count.min(64));
        let mut consumed = 1 + header_len;

        for _ in 0..count {
            match self.parse_frame(&buf[consumed..], depth + 1)? {
                Some((item, item_len)) => {
                    items.push(item);
                    consumed += item_len;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((Frame::Array(items), consumed)))
    }

    /// Finds the next CRLF-terminated line.
    ///
    /// Returns the line without its terminator plus the byte count including
    /// it. An overlong line is rejected whether or not its terminator has
    /// arrived yet, which bounds how much a client can make us buffer while
    /// hunting for CRLF.
    fn read_line<'a>(&self, buf: &'a [u8]) -> ParseResult<Option<(&'a [u8], usize)>> {
        match find_crlf(buf) {
            Some(pos) if pos > self.limits.max_inline_len => Err(ParseError::InlineLengthExceeded),
            Some(pos) => Ok(Some((&buf[..pos], pos + 2))),
            None if buf.len() > self.limits.max_inline_len => {
                Err(ParseError::InlineLengthExceeded)
            }
            None => Ok(None),
        }
    }
}

/// Position of the first CRLF in `buf`, if any.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|pair| pair == b"\r\n")
}

/// Parses a length or integer header line: optional `-`, ASCII digits,
/// nothing else. Returns `None` on any other byte or on i64 overflow.
fn parse_header_int(line: &[u8]) -> Option<i64> {
    let valid = match *line.first()? {
        b'-' => line.len() > 1 && line[1..].iter().all(u8::is_ascii_digit),
        b'0'..=b'9' => line.iter().all(u8::is_ascii_digit),
        _ => false,
    };
    if !valid {
        return None;
    }
    std::str::from_utf8(line).ok()?.parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(input: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        Parser::new().parse(input)
    }

    fn parse_err(input: &[u8]) -> ParseError {
        parse_one(input).unwrap_err()
    }

    #[test]
    fn simple_string() {
        let (frame, consumed) = parse_one(b"+OK\r\n").unwrap().unwrap();
        assert_eq!(frame, Frame::simple("OK"));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn simple_string_incomplete() {
        assert!(parse_one(b"+OK").unwrap().is_none());
        assert!(parse_one(b"+OK\r").unwrap().is_none());
    }

    #[test]
    fn error_frame() {
        let (frame, _) = parse_one(b"-ERR boom\r\n").unwrap().unwrap();
        assert_eq!(frame, Frame::error("ERR boom"));
    }

    #[test]
    fn integer_frame() {
        let (frame, consumed) = parse_one(b":1000\r\n").unwrap().unwrap();
        assert_eq!(frame, Frame::Integer(1000));
        assert_eq!(consumed, 7);

        let (frame, _) = parse_one(b":-42\r\n").unwrap().unwrap();
        assert_eq!(frame, Frame::Integer(-42));
    }

    #[test]
    fn integer_missing_digits() {
        assert_eq!(parse_err(b":\r\n"), ParseError::MissingInteger);
    }

    #[test]
    fn integer_invalid_digits() {
        assert_eq!(parse_err(b":abc\r\n"), ParseError::InvalidInteger);
        assert_eq!(parse_err(b":+5\r\n"), ParseError::InvalidInteger);
        assert_eq!(parse_err(b":1x\r\n"), ParseError::InvalidInteger);
    }

    #[test]
    fn bulk_string() {
        let (frame, consumed) = parse_one(b"$5\r\nhello\r\n").unwrap().unwrap();
        assert_eq!(frame, Frame::bulk(Bytes::from("hello")));
        assert_eq!(consumed, 11);
    }

    #[test]
    fn bulk_string_binary_safe() {
        let (frame, _) = parse_one(b"$5\r\nhe\x00lo\r\n").unwrap().unwrap();
        assert_eq!(frame, Frame::bulk(Bytes::from(&b"he\x00lo"[..])));
    }

    #[test]
    fn bulk_string_empty() {
        let (frame, consumed) = parse_one(b"$0\r\n\r\n").unwrap().unwrap();
        assert_eq!(frame, Frame::bulk(Bytes::new()));
        assert_eq!(consumed, 6);
    }

    #[test]
    fn bulk_string_null() {
        let (frame, consumed) = parse_one(b"$-1\r\n").unwrap().unwrap();
        assert_eq!(frame, Frame::Null);
        assert_eq!(consumed, 5);
    }

    #[test]
    fn bulk_string_incomplete() {
        assert!(parse_one(b"$5\r\nhel").unwrap().is_none());
        // payload present but terminator not yet complete
        assert!(parse_one(b"$5\r\nhello\r").unwrap().is_none());
    }

    #[test]
    fn bulk_length_missing() {
        assert_eq!(parse_err(b"$\r\n"), ParseError::MissingBulkLength);
    }

    #[test]
    fn bulk_length_invalid() {
        assert_eq!(parse_err(b"$-2\r\n"), ParseError::InvalidBulkLength);
        assert_eq!(parse_err(b"$abc\r\n"), ParseError::InvalidBulkLength);
    }

    #[test]
    fn bulk_bad_encoding() {
        assert_eq!(parse_err(b"$4\r\nPINGxx"), ParseError::BadBulkEncoding);
        assert_eq!(parse_err(b"*1\r\n$4\r\nPINGxx"), ParseError::BadBulkEncoding);
    }

    #[test]
    fn bulk_length_limit() {
        // Only the header is needed to trip the limit.
        let payload = format!("${}\r\n", 512 * 1024 * 1024_u64 + 1);
        assert_eq!(parse_err(payload.as_bytes()), ParseError::BulkLengthExceeded);
    }

    #[test]
    fn array_of_bulks() {
        let (frame, consumed) = parse_one(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::bulk(Bytes::from("GET")),
                Frame::bulk(Bytes::from("name")),
            ])
        );
        assert_eq!(consumed, 23);
    }

    #[test]
    fn array_empty() {
        let (frame, consumed) = parse_one(b"*0\r\n").unwrap().unwrap();
        assert_eq!(frame, Frame::Array(vec![]));
        assert_eq!(consumed, 4);
    }

    #[test]
    fn array_null() {
        let (frame, _) = parse_one(b"*-1\r\n").unwrap().unwrap();
        assert_eq!(frame, Frame::NullArray);
    }

    #[test]
    fn array_incomplete() {
        assert!(parse_one(b"*2\r\n$3\r\nGET\r\n").unwrap().is_none());
        assert!(parse_one(b"*2\r\n").unwrap().is_none());
    }

    #[test]
    fn array_mixed_elements() {
        let (frame, _) = parse_one(b"*3\r\n+OK\r\n:7\r\n$1\r\nx\r\n").unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::simple("OK"),
                Frame::Integer(7),
                Frame::bulk(Bytes::from("x")),
            ])
        );
    }

    #[test]
    fn array_length_missing() {
        assert_eq!(parse_err(b"*\r\n"), ParseError::MissingArrayLength);
    }

    #[test]
    fn array_length_invalid() {
        assert_eq!(parse_err(b"*-3\r\n"), ParseError::InvalidArrayLength);
        assert_eq!(parse_err(b"*x\r\n"), ParseError::InvalidArrayLength);
    }

    #[test]
    fn array_length_limit() {
        let payload = format!("*{}\r\n", 1024 * 1024 + 1);
        assert_eq!(parse_err(payload.as_bytes()), ParseError::ArrayLengthExceeded);
    }

    #[test]
    fn array_nesting_limit() {
        let parser = Parser::with_limits(ProtocolLimits {
            max_nesting: 4,
            ..Default::default()
        });

        let ok = b"*1\r\n".repeat(4);
        assert!(parser.parse(&ok).unwrap().is_none());

        let too_deep = b"*1\r\n".repeat(5);
        assert_eq!(
            parser.parse(&too_deep).unwrap_err(),
            ParseError::NestingExceeded
        );
    }

    #[test]
    fn nesting_limit_default_depth() {
        let too_deep = b"*1\r\n".repeat(129);
        assert_eq!(parse_err(&too_deep), ParseError::NestingExceeded);
    }

    #[test]
    fn unknown_prefix() {
        assert_eq!(parse_err(b"?\r\n"), ParseError::UnknownPrefix);
        assert_eq!(parse_err(b"*1\r\nX\r\n"), ParseError::UnknownPrefix);
    }

    #[test]
    fn inline_limit_with_terminator() {
        let parser = Parser::with_limits(ProtocolLimits {
            max_inline_len: 16,
            ..Default::default()
        });
        let mut payload = vec![b'+'];
        payload.extend_from_slice(&[b'x'; 17]);
        payload.extend_from_slice(b"\r\n");
        assert_eq!(
            parser.parse(&payload).unwrap_err(),
            ParseError::InlineLengthExceeded
        );
    }

    #[test]
    fn inline_limit_without_terminator() {
        // The line never terminates; the limit still has to fire.
        let parser = Parser::with_limits(ProtocolLimits {
            max_inline_len: 16,
            ..Default::default()
        });
        let mut payload = vec![b'+'];
        payload.extend_from_slice(&[b'x'; 32]);
        assert_eq!(
            parser.parse(&payload).unwrap_err(),
            ParseError::InlineLengthExceeded
        );
    }

    #[test]
    fn error_reply_text_matches_contract() {
        for (err, text) in [
            (ParseError::UnknownPrefix, "unknown prefix"),
            (ParseError::MissingBulkLength, "missing bulk length"),
            (ParseError::InvalidBulkLength, "invalid bulk length"),
            (ParseError::BadBulkEncoding, "bad bulk string encoding"),
            (ParseError::MissingInteger, "missing integer"),
            (ParseError::InvalidInteger, "invalid integer"),
            (ParseError::MissingArrayLength, "missing array length"),
            (
                ParseError::BulkLengthExceeded,
                "bulk length exceeds proto_max_bulk_len",
            ),
            (
                ParseError::ArrayLengthExceeded,
                "array length exceeds proto_max_array_len",
            ),
            (
                ParseError::NestingExceeded,
                "array nesting exceeds proto_max_nesting",
            ),
            (
                ParseError::InlineLengthExceeded,
                "inline length exceeds proto_max_inline_len",
            ),
        ] {
            assert_eq!(err.to_string(), format!("Protocol error: {text}"));
        }
    }

    #[test]
    fn multiple_frames_parse_in_sequence() {
        let mut buf = &b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nPING\r\n$2\r\nok\r\n"[..];
        let parser = Parser::new();

        let (first, consumed) = parser.parse(buf).unwrap().unwrap();
        assert_eq!(first.into_request().unwrap().len(), 1);
        buf = &buf[consumed..];

        let (second, consumed) = parser.parse(buf).unwrap().unwrap();
        assert_eq!(second.into_request().unwrap().len(), 2);
        assert_eq!(consumed, buf.len());
    }
}
