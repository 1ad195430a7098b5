//! End-to-end replay driver tests against a mock database sink.

use crate::support::{add, one_buy_sequence, sink_and_pool};
use mbo_backtest::prelude::*;
use std::sync::Arc;

fn run_driver(
    messages: Vec<Message>,
    strategy_index: usize,
) -> (RunSummary, String, tempfile::TempDir) {
    let (sink, pool) = sink_and_pool(1);
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));

    let mut driver = Backtester::new(Arc::clone(&pool), "ES", messages, Vec::new())
        .unwrap_or_else(|e| panic!("driver: {e}"))
        .with_log_dir(dir.path());
    driver
        .create_strategy(strategy_index)
        .unwrap_or_else(|e| panic!("strategy: {e}"));
    let summary = driver.run().unwrap_or_else(|e| panic!("run: {e}"));

    pool.close();
    let received = sink.drain(1);
    (summary, received, dir)
}

#[test]
fn test_imbalance_strategy_buys_and_flattens() {
    let (summary, received, dir) = run_driver(one_buy_sequence(), 0);

    // One entry fill from the signal plus one closing fill.
    assert_eq!(summary.trades, 2);
    // Bought at the ask (102), closed at the bid (100), 2 ticks of point
    // value and a fee per side: 2 * (100 - 102) - 2 = -6.
    assert_eq!(summary.pnl, -6);
    assert_eq!(summary.strategy.as_deref(), Some("imbalance"));
    assert_eq!(summary.messages_processed, 4);
    assert_eq!(summary.days, 1);
    assert!(!summary.stopped_early);

    // Telemetry accounting: everything enqueued was delivered somewhere.
    let file_log = summary.file_log.unwrap_or_else(|| panic!("file log"));
    assert_eq!(file_log.enqueued, file_log.dequeued + file_log.dropped);
    assert_eq!(file_log.enqueued, 2);
    let db_log = summary.db_log.unwrap_or_else(|| panic!("db log"));
    assert_eq!(db_log.enqueued, db_log.dequeued + db_log.dropped);

    // CSV file exists and holds one line per record.
    let csv_path = dir.path().join("ES_imbalance_log.csv");
    let contents = std::fs::read_to_string(&csv_path).unwrap_or_default();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    // timestamp,bid,ask,position,trade_count,pnl
    let fields: Vec<&str> = lines[0].split(',').collect();
    assert_eq!(fields.len(), 6);
    assert!(lines[0].starts_with("1970-01-01 00:00:04."));
    assert_eq!(fields[1], "100"); // best bid when the entry fill was logged
    assert_eq!(fields[2], "102"); // best ask
    assert_eq!(fields[3], "1"); // position after the buy

    // The DB sink saw line protocol for the same records.
    assert_eq!(received.lines().count(), 2);
    assert!(received.contains("orderbook_stats,instrument=ES "));
    assert!(received.contains("position=1"));
}

#[test]
fn test_csv_line_field_count() {
    let (_, received, dir) = run_driver(one_buy_sequence(), 0);
    let csv_path = dir.path().join("ES_imbalance_log.csv");
    let contents = std::fs::read_to_string(&csv_path).unwrap_or_default();
    for line in contents.lines() {
        // YYYY-MM-DD HH:MM:SS.mmm,bid,ask,position,trade_count,pnl
        assert_eq!(line.split(',').count(), 6);
    }
    drop(received);
}

#[test]
fn test_stop_before_run_processes_nothing() {
    let (sink, pool) = sink_and_pool(1);
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));

    let mut driver = Backtester::new(Arc::clone(&pool), "ES", one_buy_sequence(), Vec::new())
        .unwrap_or_else(|e| panic!("driver: {e}"))
        .with_log_dir(dir.path());
    driver
        .create_strategy(0)
        .unwrap_or_else(|e| panic!("strategy: {e}"));
    driver.request_stop();
    let summary = driver.run().unwrap_or_else(|e| panic!("run: {e}"));

    assert!(summary.stopped_early);
    assert_eq!(summary.messages_processed, 0);
    assert_eq!(summary.trades, 0);
    pool.close();
    drop(sink);
}

#[test]
fn test_multi_day_run_resets_book_between_days() {
    const DAY_NS: u64 = 86_400 * 1_000_000_000;
    // Same order id re-added on day two: only valid if the book was reset.
    let messages = vec![
        add(1, 100, 5, Side::Bid, 1_000),
        add(2, 102, 5, Side::Ask, 2_000),
        add(1, 200, 5, Side::Bid, DAY_NS + 1_000),
        add(2, 202, 5, Side::Ask, DAY_NS + 2_000),
    ];

    let (sink, pool) = sink_and_pool(1);
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let mut driver = Backtester::new(Arc::clone(&pool), "NQ", messages, Vec::new())
        .unwrap_or_else(|e| panic!("driver: {e}"))
        .with_log_dir(dir.path());
    driver
        .create_strategy(0)
        .unwrap_or_else(|e| panic!("strategy: {e}"));
    let summary = driver.run().unwrap_or_else(|e| panic!("run: {e}"));

    assert_eq!(summary.days, 2);
    assert_eq!(summary.messages_processed, 4);
    pool.close();
    drop(sink);
    drop(dir);
}

#[test]
fn test_session_window_clips_messages() {
    // 09:00, 10:00, and 17:00 UTC on the same day.
    let at = |h: u64| h * 3_600 * 1_000_000_000;
    let messages = vec![
        add(1, 100, 5, Side::Bid, at(9)),
        add(2, 102, 5, Side::Ask, at(10)),
        add(3, 101, 5, Side::Bid, at(17)),
    ];

    let (sink, pool) = sink_and_pool(1);
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let mut driver = Backtester::new(Arc::clone(&pool), "ES", messages, Vec::new())
        .unwrap_or_else(|e| panic!("driver: {e}"))
        .with_log_dir(dir.path());
    driver
        .set_trading_times("09:30:00", "16:00:00")
        .unwrap_or_else(|e| panic!("session: {e}"));
    driver
        .create_strategy(0)
        .unwrap_or_else(|e| panic!("strategy: {e}"));
    let summary = driver.run().unwrap_or_else(|e| panic!("run: {e}"));

    // Only the 10:00 message is inside the session.
    assert_eq!(summary.messages_processed, 1);
    pool.close();
    drop(sink);
    drop(dir);
}

#[test]
fn test_invalid_session_time_rejected() {
    let (sink, pool) = sink_and_pool(1);
    let mut driver = Backtester::new(Arc::clone(&pool), "ES", Vec::new(), Vec::new())
        .unwrap_or_else(|e| panic!("driver: {e}"));
    let err = driver.set_trading_times("9am", "16:00:00");
    assert!(matches!(
        err,
        Err(BacktestError::InvalidSessionTime { .. })
    ));
    pool.close();
    drop(sink);
}

#[test]
fn test_unknown_strategy_index() {
    let (sink, pool) = sink_and_pool(1);
    let mut driver = Backtester::new(Arc::clone(&pool), "ES", Vec::new(), Vec::new())
        .unwrap_or_else(|e| panic!("driver: {e}"));
    let err = driver.create_strategy(99);
    assert!(matches!(
        err,
        Err(BacktestError::UnknownStrategy { index: 99 })
    ));
    pool.close();
    drop(sink);
}

#[test]
fn test_create_strategy_after_pool_close() {
    let (sink, pool) = sink_and_pool(1);
    pool.close();
    let mut driver = Backtester::new(Arc::clone(&pool), "ES", Vec::new(), Vec::new())
        .unwrap_or_else(|e| panic!("driver: {e}"));
    let err = driver.create_strategy(0);
    assert!(matches!(err, Err(BacktestError::PoolShutdown)));
    drop(sink);
}

#[test]
fn test_run_without_strategy_is_pure_replay() {
    let (sink, pool) = sink_and_pool(1);
    let mut driver = Backtester::new(Arc::clone(&pool), "ES", one_buy_sequence(), Vec::new())
        .unwrap_or_else(|e| panic!("driver: {e}"));
    let summary = driver.run().unwrap_or_else(|e| panic!("run: {e}"));
    assert_eq!(summary.messages_processed, 4);
    assert_eq!(summary.trades, 0);
    assert!(summary.strategy.is_none());
    assert!(summary.file_log.is_none());
    pool.close();
    drop(sink);
}
