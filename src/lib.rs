//! # Deterministic Market-By-Order Replay Backtester
//!
//! A single-threaded-per-instrument backtesting engine for market-by-order
//! (MBO) data. Each replay worker reconstructs a full L3 limit order book
//! from an immutable, time-ordered message vector and drives a pluggable
//! trading strategy against it, while bounded lock-free rings fan telemetry
//! out to a CSV file and a line-protocol database sink.
//!
//! ## Architecture
//!
//! ```text
//! CSV feed ──parse──▶ Vec<Message> ──▶ Backtester (one thread per instrument)
//!                                        │  book.process_msg(msg)
//!                                        │  strategy.on_book_update(&book)
//!                                        ▼
//!                                   StatsLogger ──SPSC──▶ CSV file
//!                                        │
//!                                        └────SPSC──▶ Connection ──TCP──▶ DB
//! ```
//!
//! - **Book engine** ([`book`]): order-id-addressable L3 book. Orders and
//!   price levels live in typed object pools with stable handles; each level
//!   keeps its orders in an intrusive FIFO and fits one cache line. Two
//!   arena-backed Robin Hood tables resolve order ids and `(price, side)`
//!   keys without touching the sorted sides, which are contiguous vectors
//!   scanned only on level birth/death and L2 reads. Steady state processes
//!   messages without allocating.
//! - **Replay driver** ([`backtest`]): consumes the message vector in order,
//!   checks a cooperative stop flag once per message, and invokes the
//!   strategy whenever the top of the book moves. Multi-day inputs replay
//!   day by day with the book reset in between. The concurrent coordinator
//!   runs one driver per instrument; workers share only the database
//!   connection pool.
//! - **Telemetry** ([`telemetry`], [`db`]): strategies emit raw numeric
//!   records into bounded SPSC rings; background consumers format CSV and
//!   line protocol. Overflow drops the record and counts it — the replay
//!   thread never blocks after startup. Database connections reconnect on
//!   failure with at-most-once delivery within a run.
//! - **Strategies** ([`strategy`]): a small trait with a fixed capability
//!   set (update, trade, log, fit, close, reset). Shipped variants:
//!   mean-reversion on depth imbalance, and a linear VOI forecast fitted on
//!   a training replay.
//!
//! ## Determinism
//!
//! Replay is driven entirely by message timestamps; no wall clock enters the
//! hot path. Processing the same vector twice — with a `reset` in between —
//! produces bit-identical book state, VWAP, and VOI history.

pub mod backtest;
pub mod book;
pub mod db;
pub mod feed;
pub mod strategy;
pub mod telemetry;

pub mod prelude;
mod utils;

pub use backtest::{
    BacktestError, Backtester, ConcurrentBacktester, IngestReport, RunSummary, run_ingest,
};
pub use book::{AnalyticsFlags, BookError, OrderBook};
pub use db::{Connection, ConnectionPool, ConnectionState, DbError, PooledConnection};
pub use feed::{Action, FeedError, Message, Side, parse_file};
pub use strategy::{
    ImbalanceStrategy, LinearModelStrategy, STRATEGY_NAMES, Strategy, create_strategy,
};
pub use telemetry::{ConsumerReport, LogRecord, SpscRing, StatsLogger, TelemetryError};
pub use utils::{TimeFormatter, current_time_millis};
