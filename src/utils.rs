//! Small time helpers shared across the crate.

use chrono::DateTime;

/// Returns the current wall-clock time in milliseconds since the Unix epoch.
///
/// Used for run identifiers and throughput reports; never on the replay hot
/// path, which is driven entirely by message timestamps.
pub fn current_time_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Formats message timestamps as `YYYY-MM-DD HH:MM:SS.mmm`, re-rendering the
/// seconds prefix only when the wall second changes.
///
/// Log consumers format one record per book update; within a busy second that
/// is thousands of conversions of the same prefix. The formatter caches the
/// rendered prefix keyed on the epoch second and only appends fresh
/// milliseconds.
#[derive(Debug)]
pub struct TimeFormatter {
    last_second: i64,
    prefix: String,
}

impl TimeFormatter {
    /// Create a formatter with an empty cache.
    pub fn new() -> Self {
        Self {
            last_second: i64::MIN,
            prefix: String::with_capacity(20),
        }
    }

    /// Format a timestamp given in microseconds since the Unix epoch.
    pub fn format_micros(&mut self, timestamp_us: u64) -> String {
        let secs = (timestamp_us / 1_000_000) as i64;
        let millis = (timestamp_us / 1_000) % 1_000;

        if secs != self.last_second {
            self.last_second = secs;
            self.prefix = DateTime::from_timestamp(secs, 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "1970-01-01 00:00:00".to_string());
        }

        format!("{}.{millis:03}", self.prefix)
    }
}

impl Default for TimeFormatter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_micros_known_instant() {
        let mut fmt = TimeFormatter::new();
        // 2024-06-10 13:30:00.250 UTC
        let us = 1_718_026_200_000_000u64 + 250_000;
        assert_eq!(fmt.format_micros(us), "2024-06-10 13:30:00.250");
    }

    #[test]
    fn test_format_micros_reuses_prefix_within_second() {
        let mut fmt = TimeFormatter::new();
        let base = 1_718_026_200_000_000u64;
        let a = fmt.format_micros(base + 1_000);
        let b = fmt.format_micros(base + 999_000);
        assert_eq!(a, "2024-06-10 13:30:00.001");
        assert_eq!(b, "2024-06-10 13:30:00.999");
    }

    #[test]
    fn test_format_micros_rolls_over_seconds() {
        let mut fmt = TimeFormatter::new();
        let base = 1_718_026_200_000_000u64;
        let a = fmt.format_micros(base);
        let b = fmt.format_micros(base + 1_000_000);
        assert_eq!(a, "2024-06-10 13:30:00.000");
        assert_eq!(b, "2024-06-10 13:30:01.000");
    }

    #[test]
    fn test_current_time_millis_monotonic_enough() {
        let a = current_time_millis();
        let b = current_time_millis();
        assert!(b >= a);
    }
}
