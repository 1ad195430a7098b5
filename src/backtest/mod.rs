//! Replay drivers: the per-instrument backtester, the concurrent
//! coordinator, and the strategy-free ingest harness.

mod coordinator;
mod driver;
mod error;
mod ingest;

pub use coordinator::ConcurrentBacktester;
pub use driver::{Backtester, RunSummary, TradingDay, split_trading_days};
pub use error::BacktestError;
pub use ingest::{IngestReport, run_ingest};
