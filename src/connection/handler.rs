//! Client Session
//!
//! TCP is a byte stream: one read may end halfway through a command or carry
//! a dozen pipelined ones. The session therefore keeps an inbound buffer and,
//! after every read, drains *all* complete commands from it into one batch.
//! The batch is evaluated in arrival order into a single outbound buffer,
//! which is written and flushed once.
//!
//! ```text
//! read ──> [ SET a 1 | GET a | PIN ]   inbound buffer
//!           └──── batch ────┘   └── kept for the next read
//!                   │
//!                   ▼ execute_batch
//!          [ +OK | $1 1 ]              outbound buffer ──> write_all + flush
//! ```
//!
//! A decoded value that is not a command gets an error reply in its slot.
//! Broken framing cannot be resynchronised, so it is answered with a protocol
//! error (after the replies for everything before it) and the session ends.

use crate::commands::{Command, CommandHandler};
use crate::protocol::{ParseError, RespParser, RespValue};
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Cap on undecoded input held for one client (16 MB).
const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

const BUFFER_CAPACITY: usize = 4096;

/// Server-wide session counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub accepted: AtomicU64,
    pub active: AtomicU64,
    pub commands: AtomicU64,
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn opened(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    fn closed(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    fn record(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// One connected client.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    peer: SocketAddr,
    /// Bytes read but not yet decoded.
    inbound: BytesMut,
    /// Encoded replies for the batch in flight.
    outbound: BytesMut,
    evaluator: CommandHandler,
    decoder: RespParser,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        evaluator: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.opened();

        Self {
            stream: BufWriter::new(stream),
            peer,
            inbound: BytesMut::with_capacity(BUFFER_CAPACITY),
            outbound: BytesMut::with_capacity(BUFFER_CAPACITY),
            evaluator,
            decoder: RespParser::new(),
            stats,
        }
    }

    /// Serves the client until it hangs up or breaks the protocol.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.peer, "Client connected");

        let result = self.serve().await;
        match &result {
            Err(e) if !e.is_hangup() => warn!(client = %self.peer, error = %e, "Connection error"),
            _ => debug!(client = %self.peer, "Client disconnected"),
        }

        self.stats.closed();
        result
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        loop {
            self.fill_inbound().await?;

            let decoded = self.evaluate_inbound();
            self.flush_outbound().await?;
            decoded?;
        }
    }

    /// Evaluates every complete command in the inbound buffer.
    fn evaluate_inbound(&mut self) -> Result<(), ConnectionError> {
        let mut batch = Vec::new();

        let decoded = loop {
            match self.next_frame() {
                Ok(Some(frame)) => match Command::from_resp(frame) {
                    Ok(command) => batch.push(command),
                    Err(e) => {
                        self.run_batch(&mut batch);
                        RespValue::from(e).encode(&mut self.outbound);
                    }
                },
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.run_batch(&mut batch);

        decoded.map_err(|e| {
            warn!(client = %self.peer, error = %e, "Malformed request");
            RespValue::error(format!("ERR Protocol error: {}", e)).encode(&mut self.outbound);
            ConnectionError::ParseError(e)
        })
    }

    fn run_batch(&mut self, batch: &mut Vec<Command>) {
        if batch.is_empty() {
            return;
        }
        self.evaluator.execute_batch(batch, &mut self.outbound);
        ConnectionStats::record(&self.stats.commands, batch.len());
        trace!(client = %self.peer, commands = batch.len(), "Batch evaluated");
        batch.clear();
    }

    /// Splits the next complete frame off the inbound buffer.
    fn next_frame(&mut self) -> Result<Option<RespValue>, ParseError> {
        if self.inbound.is_empty() {
            return Ok(None);
        }

        let Some((frame, consumed)) = self.decoder.parse(&self.inbound)? else {
            trace!(client = %self.peer, buffered = self.inbound.len(), "Waiting for more data");
            return Ok(None);
        };
        let _ = self.inbound.split_to(consumed);
        Ok(Some(frame))
    }

    async fn fill_inbound(&mut self) -> Result<(), ConnectionError> {
        if self.inbound.len() >= MAX_BUFFER_SIZE {
            error!(client = %self.peer, size = self.inbound.len(), "Inbound buffer over limit");
            return Err(ConnectionError::BufferFull);
        }

        self.inbound.reserve(BUFFER_CAPACITY);
        let n = self.stream.get_mut().read_buf(&mut self.inbound).await?;

        match n {
            0 if self.inbound.is_empty() => Err(ConnectionError::ClientDisconnected),
            0 => Err(ConnectionError::UnexpectedEof),
            n => {
                ConnectionStats::record(&self.stats.bytes_in, n);
                trace!(client = %self.peer, bytes = n, "Read data");
                Ok(())
            }
        }
    }

    async fn flush_outbound(&mut self) -> Result<(), ConnectionError> {
        if self.outbound.is_empty() {
            return Ok(());
        }

        let len = self.outbound.len();
        self.stream.write_all(&self.outbound).await?;
        self.stream.flush().await?;
        self.outbound.clear();

        ConnectionStats::record(&self.stats.bytes_out, len);
        trace!(client = %self.peer, bytes = len, "Replies flushed");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    #[error("Client disconnected")]
    ClientDisconnected,

    /// The peer closed the socket in the middle of a command.
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    #[error("Buffer size limit exceeded")]
    BufferFull,
}

impl ConnectionError {
    /// A normal way for a client to go away.
    pub fn is_hangup(&self) -> bool {
        match self {
            ConnectionError::ClientDisconnected => true,
            ConnectionError::IoError(e) => e.kind() == io::ErrorKind::ConnectionReset,
            _ => false,
        }
    }
}

/// Runs a [`ConnectionHandler`] for `stream` to completion.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    evaluator: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    // Errors are already logged by `run`.
    let _ = ConnectionHandler::new(stream, peer, evaluator, stats)
        .run()
        .await;
}
