//! A single accepted client connection.
//!
//! The dispatch loop never awaits a read or write on a connection.
//! Instead it asks the multiplexer which connections are ready and then
//! uses the non-blocking `try_read`/`try_write` calls:
//! - inbound bytes go into a [`FrameBuffer`] and come out as frames
//! - outbound frames are queued and flushed as far as the socket allows
//!
//! The one bounded wait is [`Connection::close`], which gives a final
//! response up to [`CLOSE_FLUSH_TIMEOUT`] to reach the peer.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - I/O failures are returned to the caller, which drops the connection

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use relay_protocol::{DecodeError, FrameBuffer};

/// Size of one read chunk
const READ_CHUNK: usize = 4096;

/// Upper bound on bytes taken from one connection per iteration, so a
/// chatty peer cannot starve the others.
const MAX_READ_PER_ITERATION: usize = 256 * 1024;

/// Bounded wait for flushing a final response before closing
pub const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle the multiplexer assigns to each accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Whether the peer is still sending after a read pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Open,
    /// The peer closed its write side. Already buffered frames are still
    /// processed before the connection is dropped.
    Closed,
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One accepted TCP stream plus its framing state.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    stream: TcpStream,
    frames: FrameBuffer,
    outbox: Vec<u8>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("buffered_in", &self.frames.buffered())
            .field("buffered_out", &self.outbox.len())
            .finish()
    }
}

impl Connection {
    pub fn new(id: ConnectionId, stream: TcpStream, peer: SocketAddr, max_frame_bytes: usize) -> Self {
        Self {
            id,
            peer,
            stream,
            frames: FrameBuffer::new(max_frame_bytes),
            outbox: Vec::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream.poll_read_ready(cx)
    }

    pub(crate) fn poll_write_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream.poll_write_ready(cx)
    }

    /// Reads whatever the socket has available without waiting.
    pub fn receive(&mut self) -> Result<ReadStatus, ConnectionError> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut total = 0;

        while total < MAX_READ_PER_ITERATION {
            match self.stream.try_read(&mut chunk) {
                Ok(0) => return Ok(ReadStatus::Closed),
                Ok(n) => {
                    let bytes = chunk.get(..n).unwrap_or_default();
                    self.frames.extend(bytes);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if total > 0 {
            debug!(connection = %self.id, bytes = total, "Read from client");
        }
        Ok(ReadStatus::Open)
    }

    /// Pops the next complete inbound frame.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, DecodeError> {
        self.frames.next_frame()
    }

    /// Queues an encoded frame and pushes out as much as the socket takes.
    pub fn send(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
        self.outbox.extend_from_slice(frame);
        self.flush()
    }

    /// Writes queued bytes until the queue is empty or the socket would block.
    pub fn flush(&mut self) -> Result<(), ConnectionError> {
        while !self.outbox.is_empty() {
            match self.stream.try_write(&self.outbox) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "socket accepted no bytes").into())
                }
                Ok(n) => {
                    self.outbox.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn has_pending_output(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Closes the connection.
    ///
    /// With `flush_output` set, queued bytes get up to
    /// [`CLOSE_FLUSH_TIMEOUT`] to drain first. Errors are only logged; the
    /// connection is gone either way.
    pub async fn close(mut self, flush_output: bool) {
        if flush_output && !self.outbox.is_empty() {
            let outbox = std::mem::take(&mut self.outbox);
            match timeout(CLOSE_FLUSH_TIMEOUT, self.stream.write_all(&outbox)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(connection = %self.id, error = %e, "Final flush failed"),
                Err(_) => debug!(connection = %self.id, "Final flush timed out"),
            }
        }

        if let Err(e) = self.stream.shutdown().await {
            debug!(connection = %self.id, error = %e, "Shutdown failed");
        }
    }
}
