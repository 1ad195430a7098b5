//! Per-instrument replay driver.
//!
//! A [`Backtester`] owns its message vector, book, and strategy outright; no
//! other thread touches them during a run. The loop is: check the stop flag,
//! apply the message, and hand the book to the strategy when the top of the
//! book moved. Multi-day inputs are split on UTC day boundaries with the
//! book reset in between.

use super::error::BacktestError;
use crate::book::{AnalyticsFlags, OrderBook};
use crate::db::ConnectionPool;
use crate::feed::Message;
use crate::strategy::{STRATEGY_NAMES, Strategy, create_strategy};
use crate::telemetry::{ConsumerReport, StatsLogger};
use chrono::{DateTime, NaiveDate, NaiveTime};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Training replay samples VOI and mid once per this many messages.
const TRAIN_SAMPLE_INTERVAL: u64 = 1_000;

/// Book pre-sizing for a full session of MBO data.
const SESSION_ORDER_CAPACITY: usize = 1 << 20;
const SESSION_LEVEL_CAPACITY: usize = 1 << 10;

/// One calendar day's slice of the message vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingDay {
    /// UTC date of every message in the slice.
    pub date: NaiveDate,
    /// First message index (inclusive).
    pub start: usize,
    /// Past-the-end message index.
    pub end: usize,
}

/// Optional intraday session bounds applied to every trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SessionWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl SessionWindow {
    fn contains(&self, t: NaiveTime) -> bool {
        t >= self.start && t <= self.end
    }
}

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Instrument replayed.
    pub instrument: String,
    /// Strategy name, when one was configured.
    pub strategy: Option<String>,
    /// Messages applied to the book (after session clipping).
    pub messages_processed: u64,
    /// Trading days covered.
    pub days: usize,
    /// Simulated fills.
    pub trades: u32,
    /// Final marked PnL in fee-adjusted ticks.
    pub pnl: i64,
    /// File-consumer delivery accounting.
    pub file_log: Option<ConsumerReport>,
    /// DB-consumer delivery accounting.
    pub db_log: Option<ConsumerReport>,
    /// Wall-clock run time.
    pub elapsed: Duration,
    /// Whether the run exited on an external stop.
    pub stopped_early: bool,
}

/// Deterministic single-instrument replay engine.
pub struct Backtester {
    instrument: String,
    pool: Arc<ConnectionPool>,
    messages: Vec<Message>,
    train_messages: Vec<Message>,
    book: OrderBook,
    strategy: Option<Box<dyn Strategy>>,
    stop: Arc<AtomicBool>,
    session: Option<SessionWindow>,
    log_dir: PathBuf,
}

impl Backtester {
    /// Build a driver over an immutable message vector.
    ///
    /// # Errors
    ///
    /// Returns [`BacktestError`] when the book's lookup arenas cannot be
    /// mapped.
    pub fn new(
        pool: Arc<ConnectionPool>,
        instrument: &str,
        messages: Vec<Message>,
        train_messages: Vec<Message>,
    ) -> Result<Self, BacktestError> {
        Ok(Self {
            instrument: instrument.to_string(),
            pool,
            messages,
            train_messages,
            book: OrderBook::with_capacity(
                instrument,
                SESSION_ORDER_CAPACITY,
                SESSION_LEVEL_CAPACITY,
            )?,
            strategy: None,
            stop: Arc::new(AtomicBool::new(false)),
            session: None,
            log_dir: PathBuf::from("."),
        })
    }

    /// Redirect CSV log files into `dir`.
    #[must_use]
    pub fn with_log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// The instrument this driver replays.
    #[must_use]
    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Handle for requesting a cooperative stop from another thread.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Ask the replay loop to exit after the current message.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Clip every trading day to `[start, end]`, given as `HH:MM:SS`.
    ///
    /// # Errors
    ///
    /// Returns [`BacktestError::InvalidSessionTime`] on unparseable bounds.
    pub fn set_trading_times(&mut self, start: &str, end: &str) -> Result<(), BacktestError> {
        let parse = |value: &str| {
            NaiveTime::parse_from_str(value, "%H:%M:%S").map_err(|_| {
                BacktestError::InvalidSessionTime {
                    value: value.to_string(),
                }
            })
        };
        self.session = Some(SessionWindow {
            start: parse(start)?,
            end: parse(end)?,
        });
        Ok(())
    }

    /// Instantiate the strategy at `index`, checking its telemetry
    /// connection out of the pool.
    ///
    /// This is the one place the replay thread may block: the pool checkout
    /// waits for a free connection and returns `None` only on shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`BacktestError`] for a bad index, a shut-down pool, or a
    /// telemetry setup failure.
    pub fn create_strategy(&mut self, index: usize) -> Result<(), BacktestError> {
        let name = STRATEGY_NAMES
            .get(index)
            .ok_or(BacktestError::UnknownStrategy { index })?;

        let connection =
            ConnectionPool::acquire(&self.pool).ok_or(BacktestError::PoolShutdown)?;
        let csv_path = self
            .log_dir
            .join(format!("{}_{name}_log.csv", self.instrument));
        let logger = StatsLogger::create(csv_path, &self.instrument, connection)?;

        self.strategy =
            Some(create_strategy(index, logger).ok_or(BacktestError::UnknownStrategy { index })?);
        debug!(instrument = %self.instrument, strategy = name, "strategy created");
        Ok(())
    }

    /// Replay the training slice on a scratch book and fit the strategy.
    ///
    /// No-op when no strategy is configured, the strategy does not require
    /// fitting, or there is no training data.
    ///
    /// # Errors
    ///
    /// Returns [`BacktestError`] when the scratch book cannot be built or a
    /// lookup table exhausts its arena.
    pub fn train_model(&mut self) -> Result<(), BacktestError> {
        let Some(strategy) = self.strategy.as_mut() else {
            return Ok(());
        };
        if !strategy.requires_fitting() || self.train_messages.is_empty() {
            return Ok(());
        }

        let mut train_book = OrderBook::with_capacity(
            &self.instrument,
            SESSION_ORDER_CAPACITY,
            SESSION_LEVEL_CAPACITY,
        )?;

        for (i, msg) in self.train_messages.iter().enumerate() {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            train_book.process_msg(msg)?;
            if (i as u64 + 1) % TRAIN_SAMPLE_INTERVAL == 0 {
                train_book.refresh(AnalyticsFlags::VOI | AnalyticsFlags::MID, 1);
            }
        }

        strategy.fit_model(&train_book);
        info!(
            instrument = %self.instrument,
            strategy = strategy.name(),
            train_messages = self.train_messages.len(),
            "training replay complete"
        );
        Ok(())
    }

    /// Run the backtest to completion (or until stopped).
    ///
    /// Per message: relaxed stop check, `process_msg`, and — when the top of
    /// the book moved — the strategy callback. Day boundaries reset the book;
    /// strategy state resets too unless the strategy opts into carrying it.
    /// On exit the strategy closes its position, resets, and its logger is
    /// drained before the summary is assembled.
    ///
    /// # Errors
    ///
    /// Returns [`BacktestError::Book`] when a lookup table exhausts its
    /// arena mid-replay.
    pub fn run(&mut self) -> Result<RunSummary, BacktestError> {
        let started = Instant::now();
        let days = split_trading_days(&self.messages);
        let carry = self
            .strategy
            .as_ref()
            .is_some_and(|s| s.carry_across_days());

        info!(
            instrument = %self.instrument,
            messages = self.messages.len(),
            days = days.len(),
            "starting backtest"
        );

        let mut processed = 0u64;
        let mut stopped_early = false;

        'days: for (day_index, day) in days.iter().enumerate() {
            for msg_index in day.start..day.end {
                if self.stop.load(Ordering::Relaxed) {
                    stopped_early = true;
                    break 'days;
                }

                let msg = self.messages[msg_index];
                if let Some(window) = self.session
                    && !window.contains(time_of_day(msg.timestamp_ns))
                {
                    continue;
                }

                let top_before = top_of_book(&self.book);
                self.book.process_msg(&msg)?;
                processed += 1;

                if let Some(strategy) = self.strategy.as_mut()
                    && top_of_book(&self.book) != top_before
                {
                    strategy.on_book_update(&mut self.book);
                }
            }

            if day_index + 1 < days.len() {
                if let Some(strategy) = self.strategy.as_mut()
                    && !carry
                {
                    strategy.close_positions(&mut self.book);
                    strategy.reset();
                }
                self.book.reset();
                debug!(instrument = %self.instrument, date = %day.date, "day boundary reset");
            }
        }

        let mut summary = RunSummary {
            instrument: self.instrument.clone(),
            strategy: None,
            messages_processed: processed,
            days: days.len(),
            trades: 0,
            pnl: 0,
            file_log: None,
            db_log: None,
            elapsed: started.elapsed(),
            stopped_early,
        };

        if let Some(mut strategy) = self.strategy.take() {
            strategy.close_positions(&mut self.book);
            summary.strategy = Some(strategy.name().to_string());
            summary.pnl = strategy.pnl();
            summary.trades = strategy.trade_count();
            strategy.reset();
            strategy.logger_mut().shutdown();
            summary.file_log = Some(strategy.logger().file_report());
            summary.db_log = Some(strategy.logger().db_report());
        }
        self.book.reset();

        summary.elapsed = started.elapsed();
        info!(
            instrument = %summary.instrument,
            messages = summary.messages_processed,
            pnl = summary.pnl,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "backtest complete"
        );
        Ok(summary)
    }
}

impl std::fmt::Debug for Backtester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backtester")
            .field("instrument", &self.instrument)
            .field("messages", &self.messages.len())
            .field("train_messages", &self.train_messages.len())
            .field("has_strategy", &self.strategy.is_some())
            .finish()
    }
}

/// Split a time-ordered message vector into contiguous UTC-day slices.
#[must_use]
pub fn split_trading_days(messages: &[Message]) -> Vec<TradingDay> {
    let mut days: Vec<TradingDay> = Vec::new();
    for (i, msg) in messages.iter().enumerate() {
        let date = utc_date(msg.timestamp_ns);
        match days.last_mut() {
            Some(day) if day.date == date => day.end = i + 1,
            _ => days.push(TradingDay {
                date,
                start: i,
                end: i + 1,
            }),
        }
    }
    days
}

fn utc_date(timestamp_ns: u64) -> NaiveDate {
    let secs = (timestamp_ns / 1_000_000_000) as i64;
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}

fn time_of_day(timestamp_ns: u64) -> NaiveTime {
    let secs = (timestamp_ns / 1_000_000_000) as i64;
    DateTime::from_timestamp(secs, (timestamp_ns % 1_000_000_000) as u32)
        .map(|dt| dt.time())
        .unwrap_or_default()
}

/// Snapshot of the prices and volumes at the touch, compared before and
/// after each message to gate the strategy callback.
fn top_of_book(book: &OrderBook) -> (Option<i32>, Option<i32>, i64, i64) {
    (
        book.best_bid_price(),
        book.best_ask_price(),
        book.best_bid_volume(),
        book.best_ask_volume(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{Action, Side};
    use chrono::Timelike;

    fn msg_at(day: u64, id: u64) -> Message {
        // `day` days after the epoch, noon UTC.
        let ns = (day * 86_400 + 12 * 3_600) * 1_000_000_000;
        Message::new(id, ns, 1, 100, Action::Add, Side::Bid)
    }

    #[test]
    fn test_split_trading_days_groups_by_date() {
        let messages = vec![
            msg_at(0, 1),
            msg_at(0, 2),
            msg_at(1, 3),
            msg_at(2, 4),
            msg_at(2, 5),
        ];
        let days = split_trading_days(&messages);
        assert_eq!(days.len(), 3);
        assert_eq!((days[0].start, days[0].end), (0, 2));
        assert_eq!((days[1].start, days[1].end), (2, 3));
        assert_eq!((days[2].start, days[2].end), (3, 5));
    }

    #[test]
    fn test_split_trading_days_empty() {
        assert!(split_trading_days(&[]).is_empty());
    }

    #[test]
    fn test_time_of_day() {
        let ns = (12 * 3_600 + 34 * 60 + 56) * 1_000_000_000u64 + 789;
        let t = time_of_day(ns);
        assert_eq!(t.hour(), 12);
        assert_eq!(t.minute(), 34);
        assert_eq!(t.second(), 56);
    }

    #[test]
    fn test_session_window_bounds_inclusive() {
        let window = SessionWindow {
            start: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default(),
            end: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
        };
        assert!(window.contains(NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default()));
        assert!(window.contains(NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default()));
        assert!(!window.contains(NaiveTime::from_hms_opt(9, 29, 59).unwrap_or_default()));
        assert!(!window.contains(NaiveTime::from_hms_opt(16, 0, 1).unwrap_or_default()));
    }
}
