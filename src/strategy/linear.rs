//! VOI-driven linear model strategy.

use super::{ExecState, MAX_POSITION, Strategy, make_record};
use crate::book::{AnalyticsFlags, OrderBook};
use crate::feed::Side;
use crate::telemetry::StatsLogger;
use tracing::{debug, warn};

/// Samples ahead used as the forecast target during fitting.
const FORECAST_HORIZON: usize = 5;

/// Minimum usable training pairs before the model trades.
const MIN_TRAIN_SAMPLES: usize = 64;

/// Forecast magnitude (in ticks) required to enter.
const ENTRY_THRESHOLD: f64 = 0.2;

/// Levels per side summed when refreshing depth.
const VOL_DEPTH: usize = 5;

/// Trades a one-factor forecast of the forward mid-price change on VOI.
///
/// Training replays the train slice on a scratch book while the driver
/// samples VOI and mid prices; [`Strategy::fit_model`] then runs ordinary
/// least squares of `mid[t + h] - mid[t]` on `voi[t]`. Live, the fitted
/// forecast is thresholded at [`ENTRY_THRESHOLD`] ticks. The model survives
/// [`Strategy::reset`], so multi-day runs fit once and trade every day.
#[derive(Debug)]
pub struct LinearModelStrategy {
    exec: ExecState,
    logger: StatsLogger,
    beta: f64,
    intercept: f64,
    fitted: bool,
}

impl LinearModelStrategy {
    /// Create the strategy around its telemetry logger. It will not trade
    /// until [`Strategy::fit_model`] succeeds.
    #[must_use]
    pub fn new(logger: StatsLogger) -> Self {
        Self {
            exec: ExecState::default(),
            logger,
            beta: 0.0,
            intercept: 0.0,
            fitted: false,
        }
    }

    /// Fitted slope on VOI, if any.
    #[must_use]
    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Whether a usable model has been fitted.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        self.fitted
    }
}

impl Strategy for LinearModelStrategy {
    fn name(&self) -> &str {
        "linear_model"
    }

    fn requires_fitting(&self) -> bool {
        true
    }

    fn fit_model(&mut self, book: &OrderBook) {
        // VOI and mid samples are recorded in lockstep during the training
        // replay (both require a two-sided book), so aligning them from the
        // tail is sound even after the mid buffer wraps.
        let voi = book.voi_history();
        let mids = book.mid_price_samples();
        let usable = mids.min(voi.len());
        let voi = &voi[voi.len() - usable..];

        if usable <= FORECAST_HORIZON || usable - FORECAST_HORIZON < MIN_TRAIN_SAMPLES {
            warn!(
                strategy = self.name(),
                samples = usable,
                "not enough training samples to fit"
            );
            self.fitted = false;
            return;
        }

        // Oldest-first mid series from the rolling buffer.
        let mid_at = |i: usize| -> f64 {
            f64::from(book.mid_price_back(usable - 1 - i).unwrap_or(0))
        };

        let n = usable - FORECAST_HORIZON;
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        for i in 0..n {
            sum_x += voi[i] as f64;
            sum_y += mid_at(i + FORECAST_HORIZON) - mid_at(i);
        }
        let mean_x = sum_x / n as f64;
        let mean_y = sum_y / n as f64;

        let mut covariance = 0.0;
        let mut variance = 0.0;
        for i in 0..n {
            let dx = voi[i] as f64 - mean_x;
            let dy = (mid_at(i + FORECAST_HORIZON) - mid_at(i)) - mean_y;
            covariance += dx * dy;
            variance += dx * dx;
        }

        if variance == 0.0 {
            warn!(strategy = self.name(), "zero VOI variance in training data");
            self.fitted = false;
            return;
        }

        self.beta = covariance / variance;
        self.intercept = mean_y - self.beta * mean_x;
        self.fitted = true;
        debug!(
            strategy = self.name(),
            beta = self.beta,
            intercept = self.intercept,
            samples = n,
            "model fitted"
        );
    }

    fn on_book_update(&mut self, book: &mut OrderBook) {
        book.refresh(AnalyticsFlags::VOI, VOL_DEPTH);

        let (Some(bid), Some(ask)) = (book.best_bid_price(), book.best_ask_price()) else {
            return;
        };

        if self.fitted {
            let forecast = self.intercept + self.beta * book.voi() as f64;
            if forecast > ENTRY_THRESHOLD && self.exec.position < MAX_POSITION {
                self.execute_trade(Side::Bid, ask, 1);
                self.log_stats(book);
            } else if forecast < -ENTRY_THRESHOLD && self.exec.position > -MAX_POSITION {
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
        // Model parameters deliberately survive.
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
