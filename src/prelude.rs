//! Prelude module that re-exports the types most programs need.
//!
//! ```rust
//! use mbo_backtest::prelude::*;
//! ```

// Book engine
pub use crate::book::{AnalyticsFlags, BookError, OrderBook};

// Feed boundary
pub use crate::feed::{Action, FeedError, Message, Side, parse_file};

// Replay drivers
pub use crate::backtest::{
    BacktestError, Backtester, ConcurrentBacktester, IngestReport, RunSummary, run_ingest,
};

// Strategy contract
pub use crate::strategy::{
    ExecState, ImbalanceStrategy, LinearModelStrategy, STRATEGY_NAMES, Strategy, create_strategy,
};

// Telemetry and the database sink
pub use crate::db::{ConnectionPool, ConnectionState, DbError, PooledConnection};
pub use crate::telemetry::{ConsumerReport, LogRecord, StatsLogger, TelemetryError};

// Utilities
pub use crate::utils::{TimeFormatter, current_time_millis};
