//! Connection Handler Module
//!
//! This module handles individual client connections.
//! Each client gets its own handler task that runs a small state machine,
//! reading one request, answering it, and only then reading the next.
//!
//! ## Connection Lifecycle
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            │                                          │
//!            ▼                                          │
//!      ┌───────────┐  Complete   ┌─────────────┐        │
//!  ──> │  READING  │ ──────────> │ DISPATCHING │        │
//!      └─────┬─────┘             └──────┬──────┘        │
//!            │ Malformed                │ reply         │
//!            │ ("ERROR")                ▼               │
//!            │                   ┌─────────────┐        │
//!            └─────────────────> │   WRITING   │ ───────┘
//!                                └─────────────┘
//!
//!   EOF / I/O error / storage gone / fatal frame  ──>  CLOSED
//! ```
//!
//! ## Buffer Management
//!
//! We use a BytesMut buffer to accumulate incoming data. TCP is a stream
//! protocol: a read may deliver half a frame, or the end of one frame and
//! the start of the next. Bytes that belong to the next frame stay in the
//! buffer and are decoded before the socket is read again.

use crate::commands::CommandHandler;
use crate::protocol::{Command, Decoded, FrameDecoder, ProtocolError, Reply};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// States of the per-connection state machine.
#[derive(Debug)]
pub enum State {
    /// Waiting for a complete frame
    Reading,
    /// A command was decoded and must be executed
    Dispatching(Command),
    /// A reply must be written; `close` ends the connection afterwards
    Writing { reply: Reply, close: bool },
    /// Terminal
    Closed,
}

/// Handles a single client connection.
///
/// This struct manages the read buffer, decoding, and reply writing
/// for one connected client. It is generic over the stream so the
/// state machine can run on anything that reads and writes bytes.
pub struct ConnectionHandler<S = TcpStream> {
    /// The stream for this connection
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// The command handler (weakly bound to storage)
    command_handler: CommandHandler,

    /// Frame decoder
    decoder: FrameDecoder,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The stream for this connection
    /// * `addr` - The client's socket address
    /// * `command_handler` - The command handler for executing commands
    /// * `decoder` - Frame decoder carrying the size limit
    /// * `stats` - Shared connection statistics
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        decoder: FrameDecoder,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            decoder,
            stats,
        }
    }

    /// Runs the state machine until the connection closes.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    debug!(client = %self.addr, "Client disconnected")
                }
                ConnectionError::UnexpectedEof => {
                    debug!(client = %self.addr, "Client disconnected mid-frame")
                }
                ConnectionError::IoError(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, "Connection reset by client")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        self.stats.connection_closed();
        result
    }

    /// Drives state transitions until `Closed` or a transport error.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        let mut state = State::Reading;
        loop {
            state = match state {
                State::Reading => self.read_request().await?,
                State::Dispatching(command) => self.dispatch(command),
                State::Writing { reply, close } => {
                    self.send_reply(&reply).await?;
                    if close {
                        State::Closed
                    } else {
                        State::Reading
                    }
                }
                State::Closed => return Ok(()),
            };
        }
    }

    /// READING: decodes one frame, reading from the socket as needed.
    async fn read_request(&mut self) -> Result<State, ConnectionError> {
        loop {
            if let Some(state) = self.try_decode() {
                return Ok(state);
            }
            self.read_more_data().await?;
        }
    }

    /// Attempts to decode one frame from the buffer.
    ///
    /// Returns `None` when more bytes are needed.
    pub fn try_decode(&mut self) -> Option<State> {
        match self.decoder.decode::<Command>(&mut self.buffer) {
            Decoded::Complete(command) => {
                trace!(
                    client = %self.addr,
                    remaining = self.buffer.len(),
                    "Decoded command"
                );
                Some(State::Dispatching(command))
            }
            Decoded::NeedMoreData => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete frame, need more data"
                );
                None
            }
            Decoded::Malformed(e) => Some(self.on_malformed(e)),
        }
    }

    fn on_malformed(&self, e: ProtocolError) -> State {
        warn!(client = %self.addr, error = %e, "Malformed frame");
        State::Writing {
            reply: Reply::Error,
            close: e.is_fatal(),
        }
    }

    /// DISPATCHING: executes the command against storage.
    pub fn dispatch(&mut self, command: Command) -> State {
        match self.command_handler.execute(command) {
            Some(reply) => {
                self.stats.command_processed();
                State::Writing {
                    reply,
                    close: false,
                }
            }
            None => {
                debug!(client = %self.addr, "Storage is gone, dropping request");
                State::Closed
            }
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        // Ensure we have some capacity
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            // Connection closed by client
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                // Partial frame in buffer, discarded
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// WRITING: sends the whole reply to the client.
    async fn send_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        let bytes = reply.encode();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(
            client = %self.addr,
            bytes = bytes.len(),
            "Sent reply"
        );
        Ok(())
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial frame)
    #[error("Unexpected end of stream")]
    UnexpectedEof,
}

/// Handles a client connection.
///
/// This is a convenience function that creates a ConnectionHandler
/// and runs it to completion. Errors end the connection silently.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    command_handler: CommandHandler,
    decoder: FrameDecoder,
    stats: Arc<ConnectionStats>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, command_handler, decoder, stats);
    let _ = handler.run().await;
}
