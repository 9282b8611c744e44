//! One connected client.
//!
//! Clients never send anything meaningful; inbound bytes are drained and
//! discarded, and only end-of-stream or a hard error matters. Outbound
//! frames go through an all-or-nothing writer: a frame is either fully
//! handed to the kernel or its unsent tail waits in the outbox until the
//! socket is writable again.

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use thiserror::Error;
use tracing::trace;

const READ_CHUNK: usize = 512;

/// Unrecoverable send failures; each one removes the client.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Peer stopped accepting data")]
    Closed,

    #[error("Outbox backlog {pending} bytes exceeds limit of {limit}")]
    SlowConsumer { pending: usize, limit: usize },

    #[error("Write failed: {0}")]
    Io(#[from] io::Error),
}

/// Result of draining the inbound side.
#[derive(Debug)]
pub enum Inbound {
    Open,
    Closed,
    Failed(io::Error),
}

// ============================================================================
// Outbox
// ============================================================================

/// Bytes accepted for one client but not yet taken by its socket.
///
/// `buf[sent..]` is the backlog. It never grows past `limit`.
#[derive(Debug)]
struct Outbox {
    buf: Vec<u8>,
    sent: usize,
    limit: usize,
}

impl Outbox {
    fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            sent: 0,
            limit,
        }
    }

    fn pending(&self) -> usize {
        self.buf.len().saturating_sub(self.sent)
    }

    /// Writes `frame` directly when nothing is queued, keeping any unsent
    /// tail. Behind a backlog the whole frame is queued so bytes stay in
    /// order.
    fn send<W: Write>(&mut self, writer: &mut W, frame: &[u8]) -> Result<(), SendError> {
        if self.pending() > 0 {
            return self.push(frame);
        }

        let written = write_nonblocking(writer, frame)?;
        match frame.get(written..) {
            Some(rest) if !rest.is_empty() => self.push(rest),
            _ => Ok(()),
        }
    }

    fn push(&mut self, bytes: &[u8]) -> Result<(), SendError> {
        let pending = self.pending() + bytes.len();
        if pending > self.limit {
            return Err(SendError::SlowConsumer {
                pending,
                limit: self.limit,
            });
        }
        if self.sent > 0 {
            let sent = self.sent.min(self.buf.len());
            self.buf.drain(..sent);
            self.sent = 0;
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Returns `true` once the backlog is gone.
    fn flush<W: Write>(&mut self, writer: &mut W) -> Result<bool, SendError> {
        let Some(unsent) = self.buf.get(self.sent..) else {
            return Ok(true);
        };
        self.sent += write_nonblocking(writer, unsent)?;

        if self.sent >= self.buf.len() {
            self.buf.clear();
            self.sent = 0;
            return Ok(true);
        }
        Ok(false)
    }
}

// ============================================================================
// Connection
// ============================================================================

#[derive(Debug)]
pub struct ClientConnection {
    stream: TcpStream,
    peer: SocketAddr,
    outbox: Outbox,
    interest: Interest,
}

impl ClientConnection {
    pub fn new(stream: TcpStream, peer: SocketAddr, max_outbox: usize) -> Self {
        Self {
            stream,
            peer,
            outbox: Outbox::new(max_outbox),
            interest: Interest::READABLE,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Bytes queued but not yet written.
    pub fn pending(&self) -> usize {
        self.outbox.pending()
    }

    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        self.interest = Interest::READABLE;
        registry.register(&mut self.stream, token, self.interest)
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }

    /// Reads until the socket would block, discarding the payload.
    pub fn drain_inbound(&mut self) -> Inbound {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Inbound::Closed,
                Ok(n) => trace!(client = %self.peer, bytes = n, "Ignoring inbound bytes"),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Inbound::Open,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Inbound::Failed(e),
            }
        }
    }

    /// Sends one frame.
    ///
    /// Frames queue behind any earlier backlog so they stay in order.
    pub fn send_frame(&mut self, frame: &[u8]) -> Result<(), SendError> {
        self.outbox.send(&mut self.stream, frame)?;
        if self.outbox.pending() > 0 {
            trace!(client = %self.peer, pending = self.outbox.pending(), "Frame tail queued");
        }
        Ok(())
    }

    /// Writes as much of the outbox as the socket accepts.
    ///
    /// Returns `true` once the outbox is empty.
    pub fn flush(&mut self) -> Result<bool, SendError> {
        self.outbox.flush(&mut self.stream)
    }

    /// Registers write interest while a backlog exists and drops it after.
    pub fn sync_interest(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        let wanted = if self.pending() > 0 {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        if wanted != self.interest {
            registry.reregister(&mut self.stream, token, wanted)?;
            self.interest = wanted;
        }
        Ok(())
    }
}

/// Loops on partial writes and interrupted calls until `buf` is written
/// or the socket would block.
///
/// Returns the number of bytes written.
fn write_nonblocking<W: Write>(writer: &mut W, buf: &[u8]) -> Result<usize, SendError> {
    let mut written = 0;
    while let Some(rest) = buf.get(written..).filter(|rest| !rest.is_empty()) {
        match writer.write(rest) {
            Ok(0) => return Err(SendError::Closed),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(SendError::Io(e)),
        }
    }
    Ok(written)
}
