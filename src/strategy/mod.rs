//! The strategy contract and shared execution state.
//!
//! The replay driver treats every strategy uniformly through the [`Strategy`]
//! trait; the single virtual call per book update is noise next to the work
//! each callback does. A strategy exclusively owns its state; the book is
//! borrowed for the duration of each callback and never retained.

mod imbalance;
mod linear;

pub use imbalance::ImbalanceStrategy;
pub use linear::LinearModelStrategy;

use crate::book::OrderBook;
use crate::feed::Side;
use crate::telemetry::{LogRecord, StatsLogger};

/// Dollar value of one tick of PnL.
pub const POINT_VALUE: i64 = 2;

/// Flat fee charged per simulated fill.
pub const FEES_PER_SIDE: i64 = 1;

/// Position limit enforced by the shipped strategies.
pub const MAX_POSITION: i32 = 1;

/// Names of the shipped strategies, indexed by the CLI's strategy index.
pub const STRATEGY_NAMES: &[&str] = &["imbalance", "linear_model"];

/// Execution and PnL accounting shared by all strategies.
///
/// PnL marks open positions against the opposite touch:
/// `pnl = POINT_VALUE * (real_sell + theo_sell - real_buy - theo_buy) - fees`
/// where the theoretical legs value the open position at the best bid (long)
/// or best ask (short).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExecState {
    /// Net position in lots; positive is long.
    pub position: i32,
    /// Cumulative buys.
    pub buy_qty: u32,
    /// Cumulative sells.
    pub sell_qty: u32,
    /// Ticks paid across all real buys.
    pub real_total_buy_px: i64,
    /// Ticks received across all real sells.
    pub real_total_sell_px: i64,
    /// Theoretical buy leg closing a short at the ask.
    pub theo_total_buy_px: i64,
    /// Theoretical sell leg closing a long at the bid.
    pub theo_total_sell_px: i64,
    /// Cumulative fees.
    pub fees: i64,
    /// Marked-to-market PnL.
    pub pnl: i64,
    /// PnL before the last mark.
    pub prev_pnl: i64,
}

impl ExecState {
    /// Account one simulated fill. `side` is the direction of the fill:
    /// [`Side::Bid`] buys, [`Side::Ask`] sells.
    pub fn apply_fill(&mut self, side: Side, price: i32, size: u32) {
        let notional = i64::from(price) * i64::from(size);
        match side {
            Side::Bid => {
                self.position += size as i32;
                self.buy_qty += size;
                self.real_total_buy_px += notional;
            }
            Side::Ask => {
                self.position -= size as i32;
                self.sell_qty += size;
                self.real_total_sell_px += notional;
            }
        }
        self.fees += FEES_PER_SIDE * i64::from(size);
    }

    /// Re-value the open position at the opposite touch.
    pub fn update_theo(&mut self, best_bid: i32, best_ask: i32) {
        if self.position == 0 {
            self.theo_total_buy_px = 0;
            self.theo_total_sell_px = 0;
        } else if self.position > 0 {
            self.theo_total_sell_px = i64::from(best_bid) * i64::from(self.position);
            self.theo_total_buy_px = 0;
        } else {
            self.theo_total_buy_px = i64::from(best_ask) * i64::from(-self.position);
            self.theo_total_sell_px = 0;
        }
    }

    /// Recompute PnL from the current legs.
    pub fn mark_pnl(&mut self) {
        self.prev_pnl = self.pnl;
        self.pnl = POINT_VALUE
            * (self.real_total_sell_px + self.theo_total_sell_px
                - self.real_total_buy_px
                - self.theo_total_buy_px)
            - self.fees;
    }

    /// Total fills so far.
    #[must_use]
    pub fn trade_count(&self) -> u32 {
        self.buy_qty + self.sell_qty
    }

    /// Zero everything.
    pub fn reset(&mut self) {
        *self = ExecState::default();
    }
}

/// The surface the replay driver calls into.
pub trait Strategy: Send {
    /// Human-readable strategy name.
    fn name(&self) -> &str;

    /// Whether the driver must run a training replay before the backtest.
    fn requires_fitting(&self) -> bool {
        false
    }

    /// Whether strategy state survives a day boundary in multi-day runs.
    fn carry_across_days(&self) -> bool {
        false
    }

    /// Fit model parameters from a fully replayed training book.
    fn fit_model(&mut self, _book: &OrderBook) {}

    /// Called after any message that moved the top of the book.
    fn on_book_update(&mut self, book: &mut OrderBook);

    /// Account one simulated fill against strategy state. Never mutates the
    /// book, and is idempotent with respect to book state.
    fn execute_trade(&mut self, side: Side, price: i32, size: u32);

    /// Emit one stats record to the telemetry sinks.
    fn log_stats(&mut self, book: &OrderBook);

    /// Flatten the position by simulating fills at the opposite best.
    /// Called before [`Strategy::reset`] at the end of a run.
    fn close_positions(&mut self, book: &mut OrderBook);

    /// Clear per-run state. Fitted model parameters survive.
    fn reset(&mut self);

    /// Current net position.
    fn position(&self) -> i32;

    /// Current marked PnL.
    fn pnl(&self) -> i64;

    /// Cumulative simulated fills.
    fn trade_count(&self) -> u32;

    /// The telemetry logger this strategy writes to.
    fn logger(&self) -> &StatsLogger;

    /// Mutable access for the driver's shutdown sequence.
    fn logger_mut(&mut self) -> &mut StatsLogger;
}

/// Build the strategy at `index`, handing it the logger it will own.
///
/// Returns `None` for an out-of-range index; the caller surfaces the error.
pub fn create_strategy(index: usize, logger: StatsLogger) -> Option<Box<dyn Strategy>> {
    match index {
        0 => Some(Box::new(ImbalanceStrategy::new(logger))),
        1 => Some(Box::new(LinearModelStrategy::new(logger))),
        _ => None,
    }
}

/// Render the shared stats record for [`Strategy::log_stats`].
pub(crate) fn make_record(exec: &ExecState, book: &OrderBook) -> LogRecord {
    LogRecord {
        timestamp_us: book.current_time_ns() / 1_000,
        bid: book.best_bid_price().unwrap_or(0),
        ask: book.best_ask_price().unwrap_or(0),
        position: exec.position,
        trade_count: exec.trade_count(),
        pnl: exec.pnl as f64,
    }
}
