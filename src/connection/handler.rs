//! Per-client connection driver.
//!
//! Each connection owns an inbound byte buffer and a reply buffer. TCP is a
//! stream: one read may carry half a request or a dozen pipelined ones, so
//! after every read the driver drains complete frames from the buffer,
//! executes them in arrival order and appends their replies, then writes the
//! whole batch out at once.
//!
//! Error handling follows the two-tier protocol contract:
//!
//! - a request-level error (well-framed but not an array of bulk strings)
//!   gets an error reply and the connection keeps going;
//! - a framing error is fatal: any replies already produced for the batch
//!   are flushed, then the error reply, then the connection closes.

use crate::commands::CommandHandler;
use crate::protocol::{Frame, ParseError, Parser};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Initial capacity for the inbound buffer.
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Server-wide connection counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Currently open connections.
    pub active_connections: AtomicU64,
    /// Total commands executed.
    pub commands_processed: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fatal framing error; the error reply has already been flushed.
    #[error("{0}")]
    Protocol(ParseError),

    /// The client closed the connection between requests.
    #[error("client disconnected")]
    Disconnected,

    /// The client closed the connection mid-frame.
    #[error("unexpected end of stream")]
    UnexpectedEof,
}

/// State for one client connection.
pub struct Connection {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    replies: Vec<u8>,
    parser: Parser,
    handler: CommandHandler,
    stats: Arc<ConnectionStats>,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();
        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            replies: Vec::new(),
            parser: Parser::new(),
            handler,
            stats,
        }
    }

    /// Serves the connection until the client disconnects or a fatal
    /// protocol error closes it.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "client connected");

        let result = self.serve().await;

        match &result {
            Ok(()) | Err(ConnectionError::Disconnected) => {
                debug!(client = %self.addr, "client disconnected")
            }
            Err(ConnectionError::Protocol(err)) => {
                warn!(client = %self.addr, error = %err, "closed after protocol error")
            }
            Err(err) => debug!(client = %self.addr, error = %err, "connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        loop {
            let fatal = self.drain_requests();
            self.flush_replies().await?;
            if let Some(err) = fatal {
                return Err(ConnectionError::Protocol(err));
            }
            self.read_more().await?;
        }
    }

    /// Executes every complete frame in the inbound buffer, in order,
    /// appending replies. Returns the framing error when the stream broke.
    fn drain_requests(&mut self) -> Option<ParseError> {
        while !self.buffer.is_empty() {
            match self.parser.parse(&self.buffer) {
                Ok(Some((frame, consumed))) => {
                    self.buffer.advance(consumed);
                    self.execute(frame);
                }
                Ok(None) => break,
                Err(err) => {
                    Frame::error(format!("ERR {err}")).encode_into(&mut self.replies);
                    return Some(err);
                }
            }
        }
        None
    }

    fn execute(&mut self, frame: Frame) {
        match frame.into_request() {
            // an empty array is not a command; ignore it
            Ok(argv) if argv.is_empty() => {}
            Ok(argv) => {
                let reply = self.handler.dispatch(&argv);
                self.stats.command_processed();
                reply.encode_into(&mut self.replies);
            }
            Err(err) => {
                trace!(client = %self.addr, "rejected non-command frame");
                Frame::error(format!("ERR {err}")).encode_into(&mut self.replies);
            }
        }
    }

    async fn flush_replies(&mut self) -> Result<(), ConnectionError> {
        if self.replies.is_empty() {
            return Ok(());
        }
        self.stream.write_all(&self.replies).await?;
        self.stream.flush().await?;
        trace!(client = %self.addr, bytes = self.replies.len(), "replies flushed");
        self.replies.clear();
        Ok(())
    }

    async fn read_more(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
        if n == 0 {
            return Err(if self.buffer.is_empty() {
                ConnectionError::Disconnected
            } else {
                ConnectionError::UnexpectedEof
            });
        }

        trace!(client = %self.addr, bytes = n, "read");
        Ok(())
    }
}

/// Runs one client connection to completion, swallowing routine endings.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    let connection = Connection::new(stream, addr, handler, stats);
    if let Err(err) = connection.run().await {
        match err {
            ConnectionError::Disconnected | ConnectionError::Protocol(_) => {}
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            err => debug!(client = %addr, error = %err, "connection ended with error"),
        }
    }
}
