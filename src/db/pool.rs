//! Fixed-capacity pool of database connections.
//!
//! Workers check a connection out for the lifetime of their logger and hold
//! it exclusively; the checkout guard returns it to the free list on drop and
//! wakes one waiter. The pool is the only cross-thread mutable resource in
//! the system and is guarded by a mutex plus a condition variable.

use super::connection::{Connection, DbError};
use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use tracing::{debug, warn};

/// Default number of pooled connections.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Fixed-capacity pool of reconnecting database clients.
pub struct ConnectionPool {
    connections: Vec<Arc<Connection>>,
    free: Mutex<VecDeque<usize>>,
    available: Condvar,
    shutdown: AtomicBool,
}

impl ConnectionPool {
    /// Build a pool of `capacity` connections to `host:port`.
    ///
    /// Sockets open lazily; building the pool only resolves the address and
    /// starts the sender threads.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] when the address does not resolve.
    pub fn connect(host: &str, port: u16, capacity: usize) -> Result<Arc<Self>, DbError> {
        let capacity = capacity.max(1);
        let mut connections = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            connections.push(Connection::spawn(host, port)?);
        }

        debug!(host, port, capacity, "database connection pool ready");
        Ok(Arc::new(Self {
            connections,
            free: Mutex::new((0..capacity).collect()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }))
    }

    /// The process-wide pool, built on first use and shared afterwards.
    ///
    /// Later calls ignore their arguments and return the existing pool; the
    /// coordinator passes the resulting handle into every worker explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] when the first initialization fails.
    pub fn shared(host: &str, port: u16, capacity: usize) -> Result<Arc<Self>, DbError> {
        static SHARED: OnceLock<Arc<ConnectionPool>> = OnceLock::new();
        if let Some(pool) = SHARED.get() {
            return Ok(Arc::clone(pool));
        }
        let pool = Self::connect(host, port, capacity)?;
        Ok(Arc::clone(SHARED.get_or_init(|| pool)))
    }

    /// Check out a connection, blocking until one is free.
    ///
    /// Returns `None` once [`ConnectionPool::close`] has been called (or if
    /// the pool mutex was poisoned by a panicking holder).
    #[must_use]
    pub fn acquire(pool: &Arc<Self>) -> Option<PooledConnection> {
        let mut free = pool.free.lock().ok()?;
        loop {
            if pool.shutdown.load(Ordering::Acquire) {
                return None;
            }
            if let Some(index) = free.pop_front() {
                return Some(PooledConnection {
                    pool: Arc::clone(pool),
                    index,
                });
            }
            free = pool.available.wait(free).ok()?;
        }
    }

    /// Stop handing out connections, wake all waiters, and shut every
    /// connection's sender down after it drains.
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.available.notify_all();
        for connection in &self.connections {
            connection.shutdown();
        }
    }

    /// Number of connections the pool was built with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.connections.len()
    }

    /// Number of connections currently checked in.
    #[must_use]
    pub fn available_connections(&self) -> usize {
        self.free.lock().map(|f| f.len()).unwrap_or(0)
    }

    fn release(&self, index: usize) {
        match self.free.lock() {
            Ok(mut free) => {
                free.push_back(index);
                self.available.notify_one();
            }
            Err(_) => warn!("connection pool mutex poisoned during release"),
        }
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("capacity", &self.capacity())
            .field("available", &self.available_connections())
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

/// Exclusive checkout of one pooled connection.
///
/// Dereferences to [`Connection`]; dropping the guard returns the connection
/// to the pool and notifies one waiter.
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    index: usize,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.pool.connections[self.index]
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("index", &self.index)
            .field("id", &self.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn local_pool(capacity: usize) -> (Arc<ConnectionPool>, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap_or_else(|e| panic!("bind: {e}"));
        let port = listener
            .local_addr()
            .unwrap_or_else(|e| panic!("addr: {e}"))
            .port();
        let pool =
            ConnectionPool::connect("127.0.0.1", port, capacity).unwrap_or_else(|e| panic!("{e}"));
        (pool, listener)
    }

    #[test]
    fn test_acquire_and_release() {
        let (pool, _listener) = local_pool(2);
        assert_eq!(pool.available_connections(), 2);

        let a = ConnectionPool::acquire(&pool);
        assert!(a.is_some());
        let b = ConnectionPool::acquire(&pool);
        assert!(b.is_some());
        assert_eq!(pool.available_connections(), 0);

        drop(a);
        assert_eq!(pool.available_connections(), 1);
        drop(b);
        assert_eq!(pool.available_connections(), 2);
        pool.close();
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let (pool, _listener) = local_pool(1);
        let guard = ConnectionPool::acquire(&pool);
        assert!(guard.is_some());

        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || ConnectionPool::acquire(&pool).is_some())
        };

        // Give the waiter time to block, then free the connection.
        std::thread::sleep(std::time::Duration::from_millis(50));
        drop(guard);
        assert_eq!(waiter.join().unwrap_or(false), true);
        pool.close();
    }

    #[test]
    fn test_acquire_returns_none_after_close() {
        let (pool, _listener) = local_pool(1);
        let guard = ConnectionPool::acquire(&pool);
        assert!(guard.is_some());

        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || ConnectionPool::acquire(&pool).is_none())
        };

        std::thread::sleep(std::time::Duration::from_millis(50));
        pool.close();
        assert!(waiter.join().unwrap_or(false));
        drop(guard);
    }

    #[test]
    fn test_capacity_minimum_one() {
        let (pool, _listener) = local_pool(0);
        assert_eq!(pool.capacity(), 1);
        pool.close();
    }
}
