//! Concurrent coordinator tests.

use crate::support::{add, one_buy_sequence, sink_and_pool};
use mbo_backtest::prelude::*;
use std::sync::Arc;

#[test]
fn test_two_instruments_run_in_parallel() {
    let (sink, pool) = sink_and_pool(2);
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));

    let mut coordinator = ConcurrentBacktester::new(Arc::clone(&pool)).with_log_dir(dir.path());
    coordinator
        .add_instrument("ES", one_buy_sequence(), Vec::new(), None)
        .unwrap_or_else(|e| panic!("add ES: {e}"));
    coordinator
        .add_instrument("NQ", one_buy_sequence(), Vec::new(), None)
        .unwrap_or_else(|e| panic!("add NQ: {e}"));
    assert_eq!(coordinator.instrument_count(), 2);

    coordinator.start(0).unwrap_or_else(|e| panic!("start: {e}"));
    let results = coordinator.join();
    pool.close();

    assert_eq!(results.len(), 2);
    for (instrument, outcome) in &results {
        let summary = outcome
            .as_ref()
            .unwrap_or_else(|e| panic!("{instrument}: {e}"));
        assert_eq!(summary.trades, 2);
        assert_eq!(&summary.instrument, instrument);
    }

    // One CSV log per instrument, each with its own records.
    assert!(dir.path().join("ES_imbalance_log.csv").exists());
    assert!(dir.path().join("NQ_imbalance_log.csv").exists());
    drop(sink);
}

#[test]
fn test_duplicate_instrument_rejected() {
    let (sink, pool) = sink_and_pool(1);
    let mut coordinator = ConcurrentBacktester::new(Arc::clone(&pool));
    coordinator
        .add_instrument("ES", Vec::new(), Vec::new(), None)
        .unwrap_or_else(|e| panic!("add: {e}"));
    let err = coordinator.add_instrument("ES", Vec::new(), Vec::new(), None);
    assert!(matches!(
        err,
        Err(BacktestError::DuplicateInstrument { .. })
    ));
    pool.close();
    drop(sink);
}

#[test]
fn test_stop_interrupts_long_run() {
    let (sink, pool) = sink_and_pool(1);
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));

    // A long stream of adds at distinct prices.
    let messages: Vec<Message> = (0..500_000u64)
        .map(|i| add(i + 1, 100 + (i % 500) as i32, 1, Side::Bid, i))
        .collect();

    let mut coordinator = ConcurrentBacktester::new(Arc::clone(&pool)).with_log_dir(dir.path());
    coordinator
        .add_instrument("ES", messages, Vec::new(), None)
        .unwrap_or_else(|e| panic!("add: {e}"));
    coordinator.start(0).unwrap_or_else(|e| panic!("start: {e}"));

    // Let the worker get going, then cut it short.
    std::thread::sleep(std::time::Duration::from_millis(20));
    let results = coordinator.stop();
    pool.close();

    assert_eq!(results.len(), 1);
    let summary = results[0].1.as_ref().unwrap_or_else(|e| panic!("{e}"));
    assert!(summary.stopped_early || summary.messages_processed == 500_000);
    drop(sink);
    drop(dir);
}

#[test]
fn test_join_with_nothing_started_is_empty() {
    let (sink, pool) = sink_and_pool(1);
    let mut coordinator = ConcurrentBacktester::new(Arc::clone(&pool));
    coordinator
        .add_instrument("ES", Vec::new(), Vec::new(), None)
        .unwrap_or_else(|e| panic!("add: {e}"));
    assert!(coordinator.join().is_empty());
    pool.close();
    drop(sink);
}

#[test]
fn test_worker_surfaces_unknown_strategy() {
    let (sink, pool) = sink_and_pool(1);
    let mut coordinator = ConcurrentBacktester::new(Arc::clone(&pool));
    coordinator
        .add_instrument("ES", Vec::new(), Vec::new(), None)
        .unwrap_or_else(|e| panic!("add: {e}"));
    coordinator
        .start(42)
        .unwrap_or_else(|e| panic!("start: {e}"));
    let results = coordinator.join();
    assert!(matches!(
        results[0].1,
        Err(BacktestError::UnknownStrategy { index: 42 })
    ));
    pool.close();
    drop(sink);
}
