//! Asynchronous stats logger.
//!
//! The replay thread produces compact [`LogRecord`]s; two background
//! consumers drain them through dedicated SPSC rings. Formatting happens on
//! the consumer side only — the producer pays for two ring pushes and
//! nothing else.
//!
//! - The **file consumer** renders CSV lines into a ~10 MiB process-local
//!   buffer and flushes to the log file when the buffer fills and at
//!   shutdown.
//! - The **DB consumer** renders line protocol and forwards each line to the
//!   connection it checked out of the shared pool for the logger's lifetime.
//!
//! A full ring drops the record and bumps a counter; the hot path never
//! blocks. Shutdown is cooperative: the producer sets the stop flag, both
//! consumers drain their rings to empty, flush, and exit.

use super::ring::SpscRing;
use crate::db::PooledConnection;
use crate::utils::TimeFormatter;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error};

/// Capacity of each consumer's ring.
const RING_CAPACITY: usize = 1 << 20;

/// File consumer buffer size before a flush is forced.
const FILE_BUFFER_BYTES: usize = 10 * 1024 * 1024;

/// Consumer backoff while its ring is empty.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

/// One stats sample, produced on each simulated fill.
///
/// Raw integers only: the producer never formats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogRecord {
    /// Message time in microseconds since the epoch.
    pub timestamp_us: u64,
    /// Best bid in ticks (0 when the side was empty).
    pub bid: i32,
    /// Best ask in ticks (0 when the side was empty).
    pub ask: i32,
    /// Strategy position after the fill.
    pub position: i32,
    /// Cumulative fills so far.
    pub trade_count: u32,
    /// Marked-to-market PnL.
    pub pnl: f64,
}

/// Errors raised while standing up the telemetry sinks.
#[derive(Debug)]
#[non_exhaustive]
pub enum TelemetryError {
    /// The CSV log file could not be created.
    Io {
        /// Path of the log file.
        path: PathBuf,
        /// Underlying I/O error message.
        message: String,
    },
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryError::Io { path, message } => {
                write!(f, "telemetry I/O error at {}: {message}", path.display())
            }
        }
    }
}

impl std::error::Error for TelemetryError {}

/// Delivery accounting for one consumer.
#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of one consumer's delivery accounting.
///
/// After shutdown, `enqueued == dequeued + dropped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Records the producer managed to enqueue.
    pub enqueued: u64,
    /// Records the consumer drained.
    pub dequeued: u64,
    /// Records dropped on a full ring.
    pub dropped: u64,
}

/// Fan-out logger owned by one strategy.
pub struct StatsLogger {
    instrument: String,
    file_ring: Arc<SpscRing<LogRecord>>,
    db_ring: Arc<SpscRing<LogRecord>>,
    stop: Arc<AtomicBool>,
    file_counters: Arc<Counters>,
    db_counters: Arc<Counters>,
    file_thread: Option<JoinHandle<()>>,
    db_thread: Option<JoinHandle<()>>,
}

impl StatsLogger {
    /// Spawn both consumers.
    ///
    /// `connection` is the pool checkout this logger holds for its lifetime;
    /// it is released back to the pool when the DB consumer exits.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Io`] when the CSV file cannot be created.
    pub fn create<P: AsRef<Path>>(
        csv_path: P,
        instrument: &str,
        connection: PooledConnection,
    ) -> Result<Self, TelemetryError> {
        let csv_path = csv_path.as_ref();
        let file = File::create(csv_path).map_err(|e| TelemetryError::Io {
            path: csv_path.to_path_buf(),
            message: e.to_string(),
        })?;

        let file_ring = Arc::new(SpscRing::with_capacity(RING_CAPACITY));
        let db_ring = Arc::new(SpscRing::with_capacity(RING_CAPACITY));
        let stop = Arc::new(AtomicBool::new(false));
        let file_counters = Arc::new(Counters::default());
        let db_counters = Arc::new(Counters::default());

        let file_thread = {
            let ring = Arc::clone(&file_ring);
            let stop = Arc::clone(&stop);
            let counters = Arc::clone(&file_counters);
            let path = csv_path.to_path_buf();
            std::thread::Builder::new()
                .name(format!("csv-log-{instrument}"))
                .spawn(move || file_consumer(&ring, &stop, &counters, file, &path))
                .map_err(|e| TelemetryError::Io {
                    path: csv_path.to_path_buf(),
                    message: e.to_string(),
                })?
        };

        let db_thread = {
            let ring = Arc::clone(&db_ring);
            let stop = Arc::clone(&stop);
            let counters = Arc::clone(&db_counters);
            let instrument = instrument.to_string();
            std::thread::Builder::new()
                .name(format!("db-log-{instrument}"))
                .spawn(move || db_consumer(&ring, &stop, &counters, &instrument, connection))
                .map_err(|e| TelemetryError::Io {
                    path: csv_path.to_path_buf(),
                    message: e.to_string(),
                })?
        };

        Ok(Self {
            instrument: instrument.to_string(),
            file_ring,
            db_ring,
            stop,
            file_counters,
            db_counters,
            file_thread: Some(file_thread),
            db_thread: Some(db_thread),
        })
    }

    /// Enqueue one record to both consumers. Never blocks; a full ring
    /// drops the record for that consumer and counts it.
    pub fn log(&self, record: LogRecord) {
        match self.file_ring.push(record) {
            Ok(()) => {
                self.file_counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.file_counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        match self.db_ring.push(record) {
            Ok(()) => {
                self.db_counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.db_counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Stop both consumers and wait for them to drain. Idempotent.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.file_thread.take()
            && handle.join().is_err()
        {
            error!(instrument = %self.instrument, "file log consumer panicked");
        }
        if let Some(handle) = self.db_thread.take()
            && handle.join().is_err()
        {
            error!(instrument = %self.instrument, "db log consumer panicked");
        }
    }

    /// Delivery accounting for the file consumer.
    #[must_use]
    pub fn file_report(&self) -> ConsumerReport {
        report(&self.file_counters)
    }

    /// Delivery accounting for the DB consumer.
    #[must_use]
    pub fn db_report(&self) -> ConsumerReport {
        report(&self.db_counters)
    }
}

impl Drop for StatsLogger {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for StatsLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsLogger")
            .field("instrument", &self.instrument)
            .field("file", &self.file_report())
            .field("db", &self.db_report())
            .finish()
    }
}

fn report(counters: &Counters) -> ConsumerReport {
    ConsumerReport {
        enqueued: counters.enqueued.load(Ordering::Relaxed),
        dequeued: counters.dequeued.load(Ordering::Relaxed),
        dropped: counters.dropped.load(Ordering::Relaxed),
    }
}

/// Drain loop shared by both consumers: take until the ring is empty *and*
/// the stop flag is visible.
fn drain<F: FnMut(LogRecord)>(
    ring: &SpscRing<LogRecord>,
    stop: &AtomicBool,
    counters: &Counters,
    mut sink: F,
) {
    loop {
        match ring.pop() {
            Some(record) => {
                counters.dequeued.fetch_add(1, Ordering::Relaxed);
                sink(record);
            }
            None => {
                // The stop flag is released by the producer after its last
                // push, so observing it here means the ring held everything
                // it ever will.
                if stop.load(Ordering::Acquire) && ring.is_empty() {
                    return;
                }
                std::thread::sleep(IDLE_BACKOFF);
            }
        }
    }
}

fn file_consumer(
    ring: &SpscRing<LogRecord>,
    stop: &AtomicBool,
    counters: &Counters,
    mut file: File,
    path: &Path,
) {
    let mut buffer: Vec<u8> = Vec::with_capacity(FILE_BUFFER_BYTES);
    let mut formatter = TimeFormatter::new();

    drain(ring, stop, counters, |record| {
        let line = format!(
            "{},{},{},{},{},{}\n",
            formatter.format_micros(record.timestamp_us),
            record.bid,
            record.ask,
            record.position,
            record.trade_count,
            record.pnl,
        );
        if buffer.len() + line.len() > FILE_BUFFER_BYTES {
            flush_buffer(&mut file, &mut buffer, path);
        }
        buffer.extend_from_slice(line.as_bytes());
    });

    flush_buffer(&mut file, &mut buffer, path);
    debug!(path = %path.display(), "file log consumer drained");
}

fn flush_buffer(file: &mut File, buffer: &mut Vec<u8>, path: &Path) {
    if buffer.is_empty() {
        return;
    }
    if let Err(e) = file.write_all(buffer) {
        error!(path = %path.display(), error = %e, "failed to flush csv log buffer");
    }
    buffer.clear();
}

fn db_consumer(
    ring: &SpscRing<LogRecord>,
    stop: &AtomicBool,
    counters: &Counters,
    instrument: &str,
    connection: PooledConnection,
) {
    drain(ring, stop, counters, |record| {
        let line = format_line_protocol(instrument, &record);
        connection.enqueue(line);
    });
    debug!(instrument, "db log consumer drained");
    // The checkout guard drops here, returning the connection to the pool.
}

/// Render one record as a line-protocol sample.
pub(crate) fn format_line_protocol(instrument: &str, record: &LogRecord) -> String {
    format!(
        "orderbook_stats,instrument={} bid={},ask={},position={},trade_count={},pnl={} {}\n",
        instrument,
        record.bid,
        record.ask,
        record.position,
        record.trade_count,
        record.pnl,
        record.timestamp_us * 1_000,
    )
}
