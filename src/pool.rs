//! FastDFS Connection Pool
//!
//! Keeps idle connections per server address so that consecutive operations
//! against the same tracker or storage node skip the TCP handshake.

use std::collections::HashMap;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::timeout;

use crate::connection::{Connection, Connector};
use crate::errors::{FdfsError, Result};
use crate::types::ServerAddress;

/// Manages a pool of reusable connections to multiple servers
///
/// It maintains a separate idle list for each server address and handles:
///   - Connection reuse, most recently used first
///   - Idle-timeout and liveness eviction
///   - Dynamic registration of addresses discovered at runtime
///   - Thread-safe concurrent access
///
/// `acquire` never waits for capacity: it reuses an idle connection or opens a
/// new one. `max_conns` bounds only how many idle connections are kept.
pub struct ConnectionPool {
    name: &'static str,
    max_conns: usize,
    connect_timeout: Duration,
    idle_timeout: Duration,
    connector: Arc<dyn Connector>,
    cursor: AtomicUsize,
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    addrs: Vec<ServerAddress>,
    idle: HashMap<ServerAddress, Vec<Connection>>,
    closed: bool,
}

impl PoolState {
    fn register(&mut self, addr: &ServerAddress) -> &mut Vec<Connection> {
        if !self.idle.contains_key(addr) {
            self.addrs.push(addr.clone());
        }
        self.idle.entry(addr.clone()).or_default()
    }
}

impl ConnectionPool {
    /// Creates a new connection pool for the specified servers
    ///
    /// The pool starts empty; connections are created on demand.
    /// `name` only labels log records ("tracker", "storage").
    pub fn new(
        name: &'static str,
        addrs: Vec<ServerAddress>,
        max_conns: usize,
        connect_timeout: Duration,
        idle_timeout: Duration,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let mut state = PoolState::default();
        for addr in &addrs {
            state.register(addr);
        }

        Self {
            name,
            max_conns,
            connect_timeout,
            idle_timeout,
            connector,
            cursor: AtomicUsize::new(0),
            state: Mutex::new(state),
        }
    }

    /// Retrieves a connection to `addr` from the pool or creates a new one
    ///
    /// Idle connections that went stale or whose peer hung up are closed and
    /// skipped. Unknown addresses are registered on the way.
    pub async fn acquire(&self, addr: &ServerAddress) -> Result<Connection> {
        if let Some(conn) = self.take_idle(addr)? {
            return Ok(conn);
        }
        self.create_connection(addr).await
    }

    /// Acquires a connection to one of the known addresses, rotating between them
    pub async fn acquire_any(&self) -> Result<Connection> {
        let addr = {
            let state = self.state.lock();
            if state.closed {
                return Err(FdfsError::ClientClosed);
            }
            if state.addrs.is_empty() {
                return Err(FdfsError::InvalidArgument(
                    "No addresses available".to_string(),
                ));
            }
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % state.addrs.len();
            state.addrs[index].clone()
        };

        self.acquire(&addr).await
    }

    /// Like [`acquire`](Self::acquire), but the connection goes back to the
    /// pool when the returned guard is dropped
    pub async fn checkout(&self, addr: &ServerAddress) -> Result<PooledConnection<'_>> {
        let conn = self.acquire(addr).await?;
        Ok(PooledConnection::new(self, conn))
    }

    /// Scoped form of [`acquire_any`](Self::acquire_any)
    pub async fn checkout_any(&self) -> Result<PooledConnection<'_>> {
        let conn = self.acquire_any().await?;
        Ok(PooledConnection::new(self, conn))
    }

    fn take_idle(&self, addr: &ServerAddress) -> Result<Option<Connection>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(FdfsError::ClientClosed);
        }

        let list = state.register(addr);
        while let Some(conn) = list.pop() {
            if conn.last_used().elapsed() <= self.idle_timeout && conn.is_alive() {
                tracing::debug!(pool = self.name, addr = %addr, "reusing idle connection");
                return Ok(Some(conn));
            }
            tracing::debug!(pool = self.name, addr = %addr, "dropping dead or stale idle connection");
            conn.close();
        }

        Ok(None)
    }

    async fn create_connection(&self, addr: &ServerAddress) -> Result<Connection> {
        match timeout(self.connect_timeout, self.connector.connect(addr)).await {
            Ok(Ok(stream)) => {
                tracing::debug!(pool = self.name, addr = %addr, "opened new connection");
                Ok(Connection::new(stream, addr.clone()))
            }
            Ok(Err(e)) => Err(FdfsError::network("connect", addr.to_string(), e)),
            Err(_) => Err(FdfsError::timeout("connect", addr.to_string())),
        }
    }

    /// Returns a connection to the pool for reuse
    ///
    /// The connection is closed instead of kept when the pool is closed, its
    /// address is unknown, it is broken, it has been idle too long, or the
    /// address already holds `max_conns` idle connections.
    pub fn release(&self, conn: Connection) {
        let mut state = self.state.lock();
        let PoolState { idle, closed, .. } = &mut *state;

        let reason = if *closed {
            "pool closed"
        } else if conn.is_broken() {
            "broken"
        } else if conn.last_used().elapsed() > self.idle_timeout {
            "stale"
        } else {
            match idle.get_mut(conn.addr()) {
                None => "unknown address",
                Some(list) if list.len() >= self.max_conns => "pool full",
                Some(list) => {
                    list.push(conn);
                    let idle_timeout = self.idle_timeout;
                    list.retain(|c| c.last_used().elapsed() <= idle_timeout && c.is_alive());
                    return;
                }
            }
        };
        drop(state);

        tracing::debug!(pool = self.name, addr = %conn.addr(), reason, "discarding connection");
        conn.close();
    }

    /// Dynamically adds a new server address to the pool
    ///
    /// Used for storage servers discovered at runtime. No-op if the address is
    /// already known or the pool is closed.
    pub fn add_addr(&self, addr: &ServerAddress) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.register(addr);
    }

    /// Shuts down the pool and closes all idle connections
    ///
    /// After close, acquiring returns `ClientClosed`. Safe to call repeatedly.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;

        let mut closed_conns = 0;
        for (_, list) in state.idle.drain() {
            for conn in list {
                conn.close();
                closed_conns += 1;
            }
        }
        tracing::debug!(pool = self.name, closed_conns, "connection pool closed");
    }

    /// Number of idle connections currently kept for `addr`
    pub fn idle_count(&self, addr: &ServerAddress) -> usize {
        self.state.lock().idle.get(addr).map_or(0, Vec::len)
    }

    /// Known server addresses, in registration order
    pub fn addrs(&self) -> Vec<ServerAddress> {
        self.state.lock().addrs.clone()
    }

    /// True once [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.name)
            .field("max_conns", &self.max_conns)
            .field("connect_timeout", &self.connect_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

/// A connection checked out of a [`ConnectionPool`]
///
/// Dereferences to [`Connection`] and releases it back to its pool on drop,
/// whichever way the holder exits.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: ManuallyDrop<Connection>,
}

impl<'a> PooledConnection<'a> {
    fn new(pool: &'a ConnectionPool, conn: Connection) -> Self {
        Self {
            pool,
            conn: ManuallyDrop::new(conn),
        }
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        // SAFETY: `conn` is never touched again after this take.
        let conn = unsafe { ManuallyDrop::take(&mut self.conn) };
        self.pool.release(conn);
    }
}
