//! Ingest benchmark harness.
//!
//! The same loop as the replay driver with the strategy stripped out: every
//! message goes through a fresh book and nothing else. Useful for measuring
//! raw book throughput and as the body of the criterion benchmark.

use crate::book::{BookError, OrderBook};
use crate::feed::Message;
use std::time::{Duration, Instant};
use tracing::info;

/// Throughput report from one ingest run.
#[derive(Debug, Clone)]
pub struct IngestReport {
    /// Instrument label used for the book.
    pub instrument: String,
    /// Messages applied.
    pub messages: u64,
    /// Live orders left in the book at the end.
    pub resting_orders: u64,
    /// Wall-clock time for the replay.
    pub elapsed: Duration,
}

impl IngestReport {
    /// Messages per second over the whole run.
    #[must_use]
    pub fn msgs_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.messages as f64 / secs
        } else {
            0.0
        }
    }
}

/// Replay `messages` through a fresh book with no strategy attached.
///
/// # Errors
///
/// Returns [`BookError`] when a lookup table exhausts its arena.
pub fn run_ingest(instrument: &str, messages: &[Message]) -> Result<IngestReport, BookError> {
    let mut book = OrderBook::with_capacity(instrument, 1 << 20, 1 << 10)?;

    let started = Instant::now();
    for msg in messages {
        book.process_msg(msg)?;
    }
    let elapsed = started.elapsed();

    let report = IngestReport {
        instrument: instrument.to_string(),
        messages: messages.len() as u64,
        resting_orders: book.count(),
        elapsed,
    };
    info!(
        instrument,
        messages = report.messages,
        msgs_per_sec = report.msgs_per_sec() as u64,
        "ingest run complete"
    );
    Ok(report)
}
