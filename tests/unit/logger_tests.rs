//! Stats logger integration tests.

use crate::support::sink_and_pool;
use mbo_backtest::prelude::*;

fn record(n: u64) -> LogRecord {
    LogRecord {
        timestamp_us: 1_718_026_200_000_000 + n,
        bid: 4100,
        ask: 4102,
        position: 1,
        trade_count: n as u32,
        pnl: n as f64 / 2.0,
    }
}

#[test]
fn test_logger_delivers_to_both_sinks() {
    let (sink, pool) = sink_and_pool(1);
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let csv_path = dir.path().join("es_log.csv");

    let connection = ConnectionPool::acquire(&pool).unwrap_or_else(|| panic!("acquire"));
    let mut logger = StatsLogger::create(&csv_path, "ES", connection)
        .unwrap_or_else(|e| panic!("logger: {e}"));

    for n in 0..100 {
        logger.log(record(n));
    }
    logger.shutdown();

    let file_report = logger.file_report();
    assert_eq!(file_report.enqueued, 100);
    assert_eq!(file_report.dropped, 0);
    assert_eq!(file_report.enqueued, file_report.dequeued + file_report.dropped);

    let db_report = logger.db_report();
    assert_eq!(db_report.enqueued, db_report.dequeued + db_report.dropped);

    let contents = std::fs::read_to_string(&csv_path).unwrap_or_default();
    assert_eq!(contents.lines().count(), 100);
    // Consumer-side formatting: cached-prefix timestamps and raw fields.
    let first = contents.lines().next().unwrap_or_default();
    assert!(first.starts_with("2024-06-10 13:30:00."));
    assert!(first.ends_with(",4100,4102,1,0,0"));

    drop(logger);
    pool.close();
    let received = sink.drain(1);
    assert_eq!(received.lines().count(), 100);
    assert!(received.starts_with("orderbook_stats,instrument=ES bid=4100,ask=4102,position=1,"));
}

#[test]
fn test_logger_shutdown_is_idempotent() {
    let (sink, pool) = sink_and_pool(1);
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));

    let connection = ConnectionPool::acquire(&pool).unwrap_or_else(|| panic!("acquire"));
    let mut logger = StatsLogger::create(dir.path().join("log.csv"), "ES", connection)
        .unwrap_or_else(|e| panic!("logger: {e}"));
    logger.log(record(1));
    logger.shutdown();
    logger.shutdown();
    drop(logger);
    pool.close();
    drop(sink);
}

#[test]
fn test_logger_releases_connection_on_shutdown() {
    let (sink, pool) = sink_and_pool(1);
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));

    let connection = ConnectionPool::acquire(&pool).unwrap_or_else(|| panic!("acquire"));
    assert_eq!(pool.available_connections(), 0);

    let mut logger = StatsLogger::create(dir.path().join("log.csv"), "ES", connection)
        .unwrap_or_else(|e| panic!("logger: {e}"));
    logger.shutdown();

    // The DB consumer exited and returned its checkout.
    assert_eq!(pool.available_connections(), 1);
    drop(logger);
    pool.close();
    drop(sink);
}

#[test]
fn test_logger_creation_fails_on_bad_path() {
    let (sink, pool) = sink_and_pool(1);
    let connection = ConnectionPool::acquire(&pool).unwrap_or_else(|| panic!("acquire"));
    let err = StatsLogger::create("/nonexistent-dir/sub/log.csv", "ES", connection);
    assert!(matches!(err, Err(TelemetryError::Io { .. })));
    pool.close();
    drop(sink);
}
