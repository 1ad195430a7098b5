//! Concurrent coordinator: one replay worker thread per instrument.
//!
//! Workers share nothing but the connection pool; each owns its driver (and
//! therefore its book and strategy) outright. `stop` is synchronous — it
//! raises every driver's stop flag and then joins; the worst-case wait is
//! one message's processing time per worker. A panicking worker is recorded
//! for its instrument and never prevents the others from being joined.

use super::driver::{Backtester, RunSummary};
use super::error::BacktestError;
use crate::db::ConnectionPool;
use crate::feed::Message;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::{error, info};

struct InstrumentSlot {
    driver: Option<Backtester>,
    stop: Option<Arc<AtomicBool>>,
    thread: Option<JoinHandle<Result<RunSummary, BacktestError>>>,
}

/// Runs one [`Backtester`] per instrument on its own OS thread.
pub struct ConcurrentBacktester {
    pool: Arc<ConnectionPool>,
    log_dir: PathBuf,
    instruments: BTreeMap<String, InstrumentSlot>,
}

impl ConcurrentBacktester {
    /// Create a coordinator sharing `pool` across all workers.
    #[must_use]
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            log_dir: PathBuf::from("."),
            instruments: BTreeMap::new(),
        }
    }

    /// Redirect every driver's CSV logs into `dir`.
    #[must_use]
    pub fn with_log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Register an instrument with its (already parsed) message vectors and
    /// optional `HH:MM:SS` session bounds.
    ///
    /// # Errors
    ///
    /// Returns [`BacktestError`] for duplicate ids, bad session bounds, or a
    /// driver that cannot be built.
    pub fn add_instrument(
        &mut self,
        instrument: &str,
        messages: Vec<Message>,
        train_messages: Vec<Message>,
        session: Option<(&str, &str)>,
    ) -> Result<(), BacktestError> {
        if self.instruments.contains_key(instrument) {
            return Err(BacktestError::DuplicateInstrument {
                instrument: instrument.to_string(),
            });
        }

        let mut driver = Backtester::new(
            Arc::clone(&self.pool),
            instrument,
            messages,
            train_messages,
        )?
        .with_log_dir(self.log_dir.clone());
        if let Some((start, end)) = session {
            driver.set_trading_times(start, end)?;
        }

        self.instruments.insert(
            instrument.to_string(),
            InstrumentSlot {
                driver: Some(driver),
                stop: None,
                thread: None,
            },
        );
        Ok(())
    }

    /// Number of registered instruments.
    #[must_use]
    pub fn instrument_count(&self) -> usize {
        self.instruments.len()
    }

    /// Spawn one worker per instrument running the strategy at
    /// `strategy_index`.
    ///
    /// Each worker creates its strategy, runs the training replay when the
    /// strategy requires fitting, then replays its message vector.
    ///
    /// # Errors
    ///
    /// Returns [`BacktestError::Spawn`] when a worker thread cannot start.
    pub fn start(&mut self, strategy_index: usize) -> Result<(), BacktestError> {
        info!(
            instruments = self.instruments.len(),
            strategy_index, "starting concurrent backtest"
        );

        for (instrument, slot) in &mut self.instruments {
            let Some(mut driver) = slot.driver.take() else {
                continue;
            };
            slot.stop = Some(driver.stop_handle());

            let handle = std::thread::Builder::new()
                .name(format!("replay-{instrument}"))
                .spawn(move || {
                    driver.create_strategy(strategy_index)?;
                    driver.train_model()?;
                    driver.run()
                })
                .map_err(|e| BacktestError::Spawn {
                    instrument: instrument.clone(),
                    message: e.to_string(),
                })?;
            slot.thread = Some(handle);
        }
        Ok(())
    }

    /// Wait for every worker and collect per-instrument outcomes.
    ///
    /// A panicked worker yields `Err(WorkerPanicked)` for its instrument;
    /// the rest are joined regardless.
    pub fn join(&mut self) -> Vec<(String, Result<RunSummary, BacktestError>)> {
        let mut results = Vec::with_capacity(self.instruments.len());
        for (instrument, slot) in &mut self.instruments {
            let Some(handle) = slot.thread.take() else {
                continue;
            };
            let outcome = match handle.join() {
                Ok(result) => result,
                Err(_) => {
                    error!(instrument = %instrument, "replay worker panicked");
                    Err(BacktestError::WorkerPanicked {
                        instrument: instrument.clone(),
                    })
                }
            };
            results.push((instrument.clone(), outcome));
        }
        results
    }

    /// Raise every worker's stop flag, then join.
    pub fn stop(&mut self) -> Vec<(String, Result<RunSummary, BacktestError>)> {
        for slot in self.instruments.values() {
            if let Some(stop) = &slot.stop {
                stop.store(true, Ordering::Release);
            }
        }
        self.join()
    }
}

impl std::fmt::Debug for ConcurrentBacktester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentBacktester")
            .field("instruments", &self.instruments.len())
            .field("log_dir", &self.log_dir)
            .finish()
    }
}
