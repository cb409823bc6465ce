//! FastDFS Connection
//!
//! A [`Connection`] wraps one transport to one server and provides the framing
//! primitives the protocol needs: send everything, receive some, receive
//! exactly `n`. New transports come from a [`Connector`], TCP by default.

use bytes::Bytes;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::io;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

use crate::errors::{FdfsError, Result};
use crate::types::ServerAddress;

/// A byte stream a [`Connection`] can run the protocol over
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {
    /// Non-destructive liveness probe; must not consume buffered data
    fn is_alive(&self) -> bool;
}

impl Transport for TcpStream {
    fn is_alive(&self) -> bool {
        let mut byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut byte);
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());

        match self.poll_peek(&mut cx, &mut buf) {
            // Nothing to read and no hang-up seen
            Poll::Pending => true,
            Poll::Ready(Ok(n)) => n > 0,
            Poll::Ready(Err(_)) => false,
        }
    }
}

/// Opens transports for a connection pool
pub trait Connector: Send + Sync {
    /// Connects to `addr`; the pool applies the connect timeout around this call
    fn connect<'a>(&'a self, addr: &'a ServerAddress) -> BoxFuture<'a, io::Result<Box<dyn Transport>>>;
}

/// Plain TCP connector with Nagle disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, addr: &'a ServerAddress) -> BoxFuture<'a, io::Result<Box<dyn Transport>>> {
        Box::pin(async move {
            let stream = TcpStream::connect((addr.host(), addr.port())).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as Box<dyn Transport>)
        })
    }
}

/// Represents a connection to a FastDFS server (tracker or storage)
///
/// Every I/O method takes `&mut self`, so a connection only ever has one
/// request in flight. Any failure marks the connection broken; the pool
/// closes broken connections instead of reusing them. So does an exchange
/// that was started and never finished, e.g. because its future was dropped.
pub struct Connection {
    stream: Box<dyn Transport>,
    addr: ServerAddress,
    last_used: Instant,
    broken: bool,
    in_flight: bool,
}

impl Connection {
    /// Creates a new connection over an established transport
    pub fn new(stream: Box<dyn Transport>, addr: ServerAddress) -> Self {
        Self {
            stream,
            addr,
            last_used: Instant::now(),
            broken: false,
            in_flight: false,
        }
    }

    /// Transmits the whole buffer to the server
    ///
    /// A timeout of 0 waits indefinitely. `last_used` only moves on success.
    pub async fn send(&mut self, data: &[u8], timeout_ms: u64) -> Result<()> {
        let stream = &mut self.stream;
        let outcome = with_timeout(timeout_ms, async move {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await;

        self.settle("write", outcome)
    }

    /// Reads whatever is available, up to `max` bytes
    ///
    /// A read of zero bytes means the peer closed the connection and is an error.
    pub async fn receive(&mut self, max: usize, timeout_ms: u64) -> Result<Bytes> {
        let stream = &mut self.stream;
        let outcome = with_timeout(timeout_ms, async move {
            let mut buf = vec![0u8; max];
            let n = stream.read(&mut buf).await?;
            if n == 0 && max > 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                ));
            }
            buf.truncate(n);
            Ok(Bytes::from(buf))
        })
        .await;

        self.settle("read", outcome)
    }

    /// Reads exactly `size` bytes from the server
    ///
    /// The timeout applies to the entire operation, not individual reads.
    pub async fn receive_full(&mut self, size: usize, timeout_ms: u64) -> Result<Bytes> {
        let stream = &mut self.stream;
        let outcome = with_timeout(timeout_ms, async move {
            let mut buf = vec![0u8; size];
            stream.read_exact(&mut buf).await?;
            Ok(Bytes::from(buf))
        })
        .await;

        self.settle("read", outcome)
    }

    /// Checks whether the peer is still there without consuming data
    pub fn is_alive(&self) -> bool {
        !self.is_broken() && self.stream.is_alive()
    }

    /// True once an I/O failure or an unfinished exchange left the stream in
    /// an unknown state
    pub fn is_broken(&self) -> bool {
        self.broken || self.in_flight
    }

    /// Opens a request/response exchange
    ///
    /// Until [`end_exchange`](Self::end_exchange) runs the connection counts as
    /// broken, so a caller that gives up halfway never hands it back for reuse.
    pub(crate) fn begin_exchange(&mut self) {
        self.in_flight = true;
    }

    /// Closes the exchange once the response has been read to its last byte
    pub(crate) fn end_exchange(&mut self) {
        self.in_flight = false;
    }

    #[cfg(test)]
    pub(crate) fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Returns the time of the last successful send or receive
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Returns the server address this connection is connected to
    pub fn addr(&self) -> &ServerAddress {
        &self.addr
    }

    /// Terminates the connection
    pub fn close(self) {
        tracing::debug!(addr = %self.addr, broken = self.is_broken(), "closing connection");
    }

    fn settle<T>(&mut self, operation: &'static str, outcome: Option<io::Result<T>>) -> Result<T> {
        match outcome {
            Some(Ok(value)) => {
                self.last_used = Instant::now();
                Ok(value)
            }
            Some(Err(e)) => {
                self.broken = true;
                Err(FdfsError::network(operation, self.addr.to_string(), e))
            }
            None => {
                self.broken = true;
                Err(FdfsError::timeout(operation, self.addr.to_string()))
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.addr)
            .field("last_used", &self.last_used)
            .field("broken", &self.broken)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

/// Runs `fut` under a millisecond timeout; `None` means it timed out
async fn with_timeout<T, F>(timeout_ms: u64, fut: F) -> Option<io::Result<T>>
where
    F: Future<Output = io::Result<T>>,
{
    if timeout_ms == 0 {
        return Some(fut.await);
    }
    timeout(Duration::from_millis(timeout_ms), fut).await.ok()
}
