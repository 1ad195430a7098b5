//! Reconnecting TCP client for the line-protocol database sink.
//!
//! Each [`Connection`] owns a bounded queue of pre-formatted lines and a
//! dedicated sender thread that drains them to the socket. The socket is
//! opened lazily on the first send and re-opened after failures; a line that
//! was in flight when a send failed is discarded — delivery is at-most-once
//! within a run.

use crate::telemetry::SpscRing;
use std::fmt;
use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Connect and send timeouts for the database socket.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Sender backoff while its queue is empty.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

/// Capacity of the per-connection line queue.
const QUEUE_CAPACITY: usize = 1 << 20;

/// Lifecycle of one database connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No socket; the next send will attempt to connect.
    Disconnected = 0,
    /// A connect attempt is in progress.
    Connecting = 1,
    /// The socket is open and healthy.
    Active = 2,
    /// The last send failed; the next send reconnects.
    Degraded = 3,
    /// The sender thread has exited.
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Active,
            3 => ConnectionState::Degraded,
            4 => ConnectionState::Closed,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Errors raised while setting up database connections.
#[derive(Debug)]
#[non_exhaustive]
pub enum DbError {
    /// The host/port pair did not resolve to a socket address.
    Resolve {
        /// Hostname given.
        host: String,
        /// Port given.
        port: u16,
        /// Underlying resolver error, if any.
        message: String,
    },
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::Resolve {
                host,
                port,
                message,
            } => {
                write!(f, "failed to resolve {host}:{port}: {message}")
            }
        }
    }
}

impl std::error::Error for DbError {}

/// One reconnecting line-protocol client.
pub struct Connection {
    id: String,
    addr: SocketAddr,
    queue: SpscRing<String>,
    stop: AtomicBool,
    state: AtomicU8,
    sent: AtomicU64,
    dropped: AtomicU64,
    discarded: AtomicU64,
    sender: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Create a connection to `host:port` and start its sender thread.
    ///
    /// The socket itself is opened lazily on the first dequeue.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Resolve`] when the address does not resolve.
    pub fn spawn(host: &str, port: u16) -> Result<Arc<Self>, DbError> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| DbError::Resolve {
                host: host.to_string(),
                port,
                message: e.to_string(),
            })?
            .next()
            .ok_or_else(|| DbError::Resolve {
                host: host.to_string(),
                port,
                message: "no addresses returned".to_string(),
            })?;

        let connection = Arc::new(Self {
            id: format!("db-{}", Uuid::new_v4().simple()),
            addr,
            queue: SpscRing::with_capacity(QUEUE_CAPACITY),
            stop: AtomicBool::new(false),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            sender: Mutex::new(None),
        });

        let handle = {
            let connection = Arc::clone(&connection);
            std::thread::Builder::new()
                .name(connection.id.clone())
                .spawn(move || connection.sender_loop())
                .map_err(|e| DbError::Resolve {
                    host: host.to_string(),
                    port,
                    message: format!("failed to spawn sender thread: {e}"),
                })?
        };
        if let Ok(mut guard) = connection.sender.lock() {
            *guard = Some(handle);
        }

        Ok(connection)
    }

    /// Queue one pre-formatted line for sending. Never blocks; a full queue
    /// drops the line and counts it.
    pub fn enqueue(&self, line: String) {
        if self.queue.push(line).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Stable identifier for diagnostics.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lines successfully written to the socket.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Lines rejected because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Lines lost to send failures or an unreachable sink.
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Stop the sender thread after it drains the queue. Idempotent.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        let handle = self.sender.lock().ok().and_then(|mut g| g.take());
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!(id = %self.id, "db sender thread panicked");
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn sender_loop(&self) {
        let mut stream: Option<TcpStream> = None;

        loop {
            match self.queue.pop() {
                Some(line) => self.send_line(&mut stream, &line),
                None => {
                    if self.stop.load(Ordering::Acquire) && self.queue.is_empty() {
                        break;
                    }
                    std::thread::sleep(IDLE_BACKOFF);
                }
            }
        }

        drop(stream);
        self.set_state(ConnectionState::Closed);
        debug!(id = %self.id, sent = self.sent(), "db sender closed");
    }

    fn send_line(&self, stream: &mut Option<TcpStream>, line: &str) {
        let Some(socket) = self.ensure_connected(stream) else {
            // The sink is unreachable; the record is not retried.
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        };

        if let Err(e) = socket.write_all(line.as_bytes()) {
            warn!(id = %self.id, error = %e, "db send failed, reconnecting on next line");
            self.discarded.fetch_add(1, Ordering::Relaxed);
            *stream = None;
            self.set_state(ConnectionState::Degraded);
            return;
        }

        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn ensure_connected<'a>(&self, stream: &'a mut Option<TcpStream>) -> Option<&'a mut TcpStream> {
        if stream.is_none() {
            self.set_state(ConnectionState::Connecting);
            match TcpStream::connect_timeout(&self.addr, SOCKET_TIMEOUT) {
                Ok(socket) => {
                    let _ = socket.set_write_timeout(Some(SOCKET_TIMEOUT));
                    let _ = socket.set_read_timeout(Some(SOCKET_TIMEOUT));
                    let _ = socket.set_nodelay(true);
                    self.set_state(ConnectionState::Active);
                    *stream = Some(socket);
                    debug!(id = %self.id, addr = %self.addr, "db connection established");
                }
                Err(e) => {
                    warn!(id = %self.id, addr = %self.addr, error = %e, "db connect failed");
                    self.set_state(ConnectionState::Disconnected);
                    return None;
                }
            }
        }
        stream.as_mut()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("state", &self.state())
            .field("sent", &self.sent())
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn test_state_roundtrip() {
        assert_eq!(
            ConnectionState::from_u8(ConnectionState::Degraded as u8),
            ConnectionState::Degraded
        );
        assert_eq!(ConnectionState::from_u8(99), ConnectionState::Disconnected);
    }

    #[test]
    fn test_resolve_failure() {
        let err = Connection::spawn("definitely.not.a.real.host.invalid", 9009);
        assert!(matches!(err, Err(DbError::Resolve { .. })));
    }

    #[test]
    fn test_lines_reach_sink() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap_or_else(|e| panic!("bind: {e}"));
        let addr = listener.local_addr().unwrap_or_else(|e| panic!("addr: {e}"));

        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap_or_else(|e| panic!("accept: {e}"));
            let mut buf = String::new();
            let _ = socket.read_to_string(&mut buf);
            buf
        });

        let conn = Connection::spawn("127.0.0.1", addr.port()).unwrap_or_else(|e| panic!("{e}"));
        conn.enqueue("m,instrument=T bid=1 100\n".to_string());
        conn.enqueue("m,instrument=T bid=2 200\n".to_string());
        conn.shutdown();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.sent(), 2);

        let received = server.join().unwrap_or_default();
        assert_eq!(received.lines().count(), 2);
        assert!(received.contains("bid=2"));
    }

    #[test]
    fn test_unreachable_sink_discards() {
        // A port from the dynamic range with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap_or_else(|e| panic!("bind: {e}"));
        let port = listener
            .local_addr()
            .unwrap_or_else(|e| panic!("addr: {e}"))
            .port();
        drop(listener);

        let conn = Connection::spawn("127.0.0.1", port).unwrap_or_else(|e| panic!("{e}"));
        conn.enqueue("lost line\n".to_string());
        conn.shutdown();
        assert_eq!(conn.sent(), 0);
        assert_eq!(conn.discarded(), 1);
    }
}
