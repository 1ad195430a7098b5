//! Telemetry fan-out: SPSC rings between the replay thread and the
//! background log consumers.

mod logger;
mod ring;

pub use logger::{ConsumerReport, LogRecord, StatsLogger, TelemetryError};
pub use ring::SpscRing;
