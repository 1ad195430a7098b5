//! Mean-reversion on book imbalance.

use super::{ExecState, MAX_POSITION, Strategy, make_record};
use crate::book::{AnalyticsFlags, OrderBook};
use crate::feed::Side;
use crate::telemetry::StatsLogger;
use tracing::warn;

/// Levels per side summed into the imbalance signal.
const VOL_DEPTH: usize = 5;

/// Buys into sell pressure and sells into buy pressure when the mid has
/// drifted away from VWAP.
///
/// On each update the strategy refreshes the top-[`VOL_DEPTH`] depth sums
/// and the imbalance. A positive imbalance with the mid below VWAP lifts the
/// ask; a negative imbalance with the mid above VWAP hits the bid. Position
/// is capped at [`MAX_POSITION`] per side. Signals are suppressed until the
/// first trade print seeds the VWAP.
#[derive(Debug)]
pub struct ImbalanceStrategy {
    exec: ExecState,
    logger: StatsLogger,
}

impl ImbalanceStrategy {
    /// Create the strategy around its telemetry logger.
    #[must_use]
    pub fn new(logger: StatsLogger) -> Self {
        Self {
            exec: ExecState::default(),
            logger,
        }
    }
}

impl Strategy for ImbalanceStrategy {
    fn name(&self) -> &str {
        "imbalance"
    }

    fn on_book_update(&mut self, book: &mut OrderBook) {
        book.refresh(AnalyticsFlags::VOLS | AnalyticsFlags::IMBALANCE, VOL_DEPTH);

        let (Some(bid), Some(ask), Some(mid)) = (
            book.best_bid_price(),
            book.best_ask_price(),
            book.mid_price(),
        ) else {
            return;
        };

        let vwap = book.vwap();
        if vwap > 0.0 {
            let imbalance = book.imbalance();
            if imbalance > 0.0 && f64::from(mid) < vwap && self.exec.position < MAX_POSITION {
                self.execute_trade(Side::Bid, ask, 1);
                self.log_stats(book);
            } else if imbalance < 0.0 && f64::from(mid) > vwap && self.exec.position > -MAX_POSITION
            {
                self.execute_trade(Side::Ask, bid, 1);
                self.log_stats(book);
            }
        }

        self.exec.update_theo(bid, ask);
        self.exec.mark_pnl();
    }

    fn execute_trade(&mut self, side: Side, price: i32, size: u32) {
        self.exec.apply_fill(side, price, size);
    }

    fn log_stats(&mut self, book: &OrderBook) {
        self.logger.log(make_record(&self.exec, book));
    }

    fn close_positions(&mut self, book: &mut OrderBook) {
        if self.exec.position == 0 {
            return;
        }

        while self.exec.position > 0 {
            let Some(bid) = book.best_bid_price() else {
                warn!(strategy = self.name(), "no bid to close long against");
                break;
            };
            self.execute_trade(Side::Ask, bid, 1);
            self.exec.update_theo(bid, book.best_ask_price().unwrap_or(bid));
            self.exec.mark_pnl();
            self.log_stats(book);
        }

        while self.exec.position < 0 {
            let Some(ask) = book.best_ask_price() else {
                warn!(strategy = self.name(), "no ask to close short against");
                break;
            };
            self.execute_trade(Side::Bid, ask, 1);
            self.exec.update_theo(book.best_bid_price().unwrap_or(ask), ask);
            self.exec.mark_pnl();
            self.log_stats(book);
        }

        debug_assert_eq!(self.exec.position, 0);
    }

    fn reset(&mut self) {
        self.exec.reset();
    }

    fn position(&self) -> i32 {
        self.exec.position
    }

    fn pnl(&self) -> i64 {
        self.exec.pnl
    }

    fn trade_count(&self) -> u32 {
        self.exec.trade_count()
    }

    fn logger(&self) -> &StatsLogger {
        &self.logger
    }

    fn logger_mut(&mut self) -> &mut StatsLogger {
        &mut self.logger
    }
}
