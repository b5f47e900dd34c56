//! Bounded SQLite connection pool.
//!
//! The pool holds a fixed number of tuned connections in an idle queue.
//! `acquire()` blocks up to the configured timeout; when the pool is
//! exhausted past the timeout it hands out a temporary *overflow*
//! connection instead of failing the caller — availability is traded for
//! the isolation a bounded pool would otherwise guarantee. Overflow
//! connections are closed after one use and never enter the queue.
//!
//! Connections are tuned for WAL-mode concurrent reads with relaxed
//! durability: a crash may lose the last committed transaction but never
//! corrupts the store.

use std::collections::VecDeque;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{DbError, DbResult};

/// Configuration for a [`ConnectionPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
    /// Number of pooled connections created up front.
    pub pool_size: usize,
    /// How long `acquire()` waits for an idle connection before overflowing.
    pub acquire_timeout: Duration,
}

impl PoolConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool_size: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }
}

/// A live connection owned by the pool (or handed out as overflow).
struct PooledConnection {
    conn: Connection,
    id: u64,
    overflow: bool,
}

/// Queue and counter bookkeeping, guarded by the pool mutex.
///
/// Invariant: `idle.len() + active <= pool_size` for pooled connections;
/// overflow connections are tracked by neither field.
struct PoolInner {
    idle: VecDeque<PooledConnection>,
    active: usize,
    closed: bool,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total_connections: u64,
    pub active_connections: usize,
    pub idle_connections: usize,
    pub total_requests: u64,
}

/// Thread-safe bounded pool of SQLite connections.
///
/// The mutex guards only queue and counter bookkeeping; it is never held
/// across a SQLite call.
pub struct ConnectionPool {
    path: PathBuf,
    pool_size: usize,
    acquire_timeout: Duration,
    inner: Mutex<PoolInner>,
    available: Condvar,
    total_connections: AtomicU64,
    total_requests: AtomicU64,
    next_id: AtomicU64,
}

impl ConnectionPool {
    /// Open the pool, creating up to `pool_size` connections.
    ///
    /// Connection-creation failures are logged and non-fatal: the pool
    /// simply starts under capacity. Construction itself never fails.
    pub fn open(config: PoolConfig) -> Self {
        let pool = Self {
            path: config.path,
            pool_size: config.pool_size,
            acquire_timeout: config.acquire_timeout,
            inner: Mutex::new(PoolInner {
                idle: VecDeque::with_capacity(config.pool_size),
                active: 0,
                closed: false,
            }),
            available: Condvar::new(),
            total_connections: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
        };

        let mut connections = Vec::with_capacity(pool.pool_size);
        for _ in 0..pool.pool_size {
            match pool.create_connection(false) {
                Ok(conn) => connections.push(conn),
                Err(e) => error!(error = %e, "failed to create pooled connection"),
            }
        }
        let created = connections.len() as u64;
        {
            let mut inner = pool.inner.lock().expect("pool lock");
            inner.idle.extend(connections);
        }
        pool.total_connections.store(created, Ordering::Relaxed);

        info!(
            path = %pool.path.display(),
            pool_size = pool.pool_size,
            created,
            "connection pool initialized"
        );
        pool
    }

    /// Create one tuned connection.
    ///
    /// The PRAGMA set is a fixed default of the pool, not per-call
    /// configuration: WAL journal, NORMAL synchronous (a crash may lose
    /// the last commit, never corrupts), bounded page cache, in-memory
    /// temp storage, and memory-mapped I/O up to 256 MiB.
    fn create_connection(&self, overflow: bool) -> DbResult<PooledConnection> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\
             PRAGMA synchronous = NORMAL;\
             PRAGMA cache_size = 10000;\
             PRAGMA temp_store = MEMORY;\
             PRAGMA mmap_size = 268435456;",
        )?;
        conn.busy_timeout(self.acquire_timeout)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnection { conn, id, overflow })
    }

    /// Acquire a connection, blocking up to the configured timeout.
    ///
    /// On exhaustion past the timeout a temporary overflow connection is
    /// created and returned instead of an error; it is closed when the
    /// guard drops. Fails only with [`DbError::PoolClosed`] or if overflow
    /// creation itself fails.
    pub fn acquire(&self) -> DbResult<PoolGuard<'_>> {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut inner = self.inner.lock().expect("pool lock");
        loop {
            if inner.closed {
                return Err(DbError::PoolClosed);
            }
            if let Some(conn) = inner.idle.pop_front() {
                inner.active += 1;
                self.total_requests.fetch_add(1, Ordering::Relaxed);
                return Ok(PoolGuard {
                    pool: self,
                    conn: Some(conn),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .available
                .wait_timeout(inner, deadline - now)
                .expect("pool lock");
            inner = guard;
        }
        drop(inner);

        warn!("connection pool exhausted, creating overflow connection");
        let conn = self.create_connection(true)?;
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        Ok(PoolGuard {
            pool: self,
            conn: Some(conn),
        })
    }

    /// Close the pool: drain and close idle connections, reset counters.
    ///
    /// Idempotent. Waiters blocked in `acquire()` wake and observe
    /// [`DbError::PoolClosed`]; connections still checked out are closed
    /// when their guards drop instead of returning to the queue.
    pub fn close(&self) {
        let (was_closed, drained) = {
            let mut inner = self.inner.lock().expect("pool lock");
            let was_closed = inner.closed;
            inner.closed = true;
            (was_closed, inner.idle.drain(..).collect::<Vec<_>>())
        };
        if was_closed {
            return;
        }
        let closed = drained.len();
        drop(drained); // connections close here, outside the lock
        self.available.notify_all();
        self.total_connections.store(0, Ordering::Relaxed);
        self.total_requests.store(0, Ordering::Relaxed);
        info!(closed, "connection pool closed");
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().expect("pool lock");
        PoolStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: inner.active,
            idle_connections: inner.idle.len(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("pool lock").closed
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("path", &self.path)
            .field("pool_size", &self.pool_size)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Scoped connection acquisition.
///
/// Dereferences to [`rusqlite::Connection`]. On drop, a pooled connection
/// returns to the idle queue (or closes if the pool shut down meanwhile);
/// an overflow connection closes immediately. Release happens on every
/// exit path, including panics.
pub struct PoolGuard<'p> {
    pool: &'p ConnectionPool,
    conn: Option<PooledConnection>,
}

impl PoolGuard<'_> {
    /// Whether this guard holds an overflow connection.
    pub fn is_overflow(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| c.overflow)
    }
}

impl Deref for PoolGuard<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn.as_ref().expect("connection present").conn
    }
}

impl Drop for PoolGuard<'_> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else { return };
        if conn.overflow {
            debug!(id = conn.id, "closing overflow connection");
            return;
        }
        let mut inner = self
            .pool
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.active = inner.active.saturating_sub(1);
        if inner.closed {
            drop(inner);
            drop(conn); // pool shut down while checked out; close it
        } else {
            inner.idle.push_back(conn);
            self.pool.available.notify_one();
        }
    }
}
