//! Backtest orchestration errors.

use crate::book::BookError;
use crate::db::DbError;
use crate::feed::FeedError;
use crate::telemetry::TelemetryError;
use std::fmt;

/// Errors surfaced by the replay drivers and the coordinator.
#[derive(Debug)]
#[non_exhaustive]
pub enum BacktestError {
    /// The strategy index does not name a shipped strategy.
    UnknownStrategy {
        /// The index given.
        index: usize,
    },

    /// The connection pool refused a checkout because it is shutting down.
    PoolShutdown,

    /// A session bound could not be parsed as `HH:MM:SS`.
    InvalidSessionTime {
        /// The offending value.
        value: String,
    },

    /// An instrument id was registered twice.
    DuplicateInstrument {
        /// The duplicated id.
        instrument: String,
    },

    /// A worker thread could not be spawned.
    Spawn {
        /// The instrument whose worker failed to start.
        instrument: String,
        /// Underlying error message.
        message: String,
    },

    /// A worker thread panicked; other workers are unaffected.
    WorkerPanicked {
        /// The instrument whose worker died.
        instrument: String,
    },

    /// Book engine failure (lookup arena exhausted).
    Book(BookError),

    /// Telemetry sink setup failure.
    Telemetry(TelemetryError),

    /// Database client setup failure.
    Db(DbError),

    /// Feed parse failure.
    Feed(FeedError),
}

impl fmt::Display for BacktestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BacktestError::UnknownStrategy { index } => {
                write!(f, "unknown strategy index {index}")
            }
            BacktestError::PoolShutdown => {
                write!(f, "connection pool is shut down")
            }
            BacktestError::InvalidSessionTime { value } => {
                write!(f, "invalid session time {value:?}, expected HH:MM:SS")
            }
            BacktestError::DuplicateInstrument { instrument } => {
                write!(f, "instrument {instrument} registered twice")
            }
            BacktestError::Spawn {
                instrument,
                message,
            } => {
                write!(f, "failed to spawn worker for {instrument}: {message}")
            }
            BacktestError::WorkerPanicked { instrument } => {
                write!(f, "worker for {instrument} panicked")
            }
            BacktestError::Book(e) => write!(f, "book error: {e}"),
            BacktestError::Telemetry(e) => write!(f, "telemetry error: {e}"),
            BacktestError::Db(e) => write!(f, "database error: {e}"),
            BacktestError::Feed(e) => write!(f, "feed error: {e}"),
        }
    }
}

impl std::error::Error for BacktestError {}

impl From<BookError> for BacktestError {
    fn from(e: BookError) -> Self {
        BacktestError::Book(e)
    }
}

impl From<TelemetryError> for BacktestError {
    fn from(e: TelemetryError) -> Self {
        BacktestError::Telemetry(e)
    }
}

impl From<DbError> for BacktestError {
    fn from(e: DbError) -> Self {
        BacktestError::Db(e)
    }
}

impl From<FeedError> for BacktestError {
    fn from(e: FeedError) -> Self {
        BacktestError::Feed(e)
    }
}
