//! Thin CLI front-end for the replay backtester.
//!
//! Parses per-instrument CSV feeds, builds the shared database connection
//! pool, and runs one replay worker per instrument. Exits 0 on a clean run
//! and 1 on any configuration, parse, or worker failure, with the diagnostic
//! on stderr.

use clap::Parser;
use mbo_backtest::prelude::*;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "backtest",
    about = "Deterministic MBO replay backtester",
    version
)]
struct Args {
    /// Strategy index (0 = imbalance, 1 = linear_model).
    #[arg(long, default_value_t = 0)]
    strategy: usize,

    /// Instrument feed as ID=BACKTEST.csv or ID=BACKTEST.csv:TRAIN.csv.
    /// Repeat for multiple instruments.
    #[arg(long = "instrument", required_unless_present = "config")]
    instruments: Vec<String>,

    /// JSON config mapping instrument ids to feed paths:
    /// {"ES": {"backtest": "es.csv", "train": "es_train.csv"}}
    #[arg(long)]
    config: Option<PathBuf>,

    /// Only replay the books and report throughput; no strategy, no sinks.
    #[arg(long)]
    ingest_only: bool,

    /// Clip each trading day to a session, formatted HH:MM:SS-HH:MM:SS.
    #[arg(long)]
    session: Option<String>,

    /// Database sink host.
    #[arg(long, default_value = "127.0.0.1")]
    db_host: String,

    /// Database sink port.
    #[arg(long, default_value_t = 9009)]
    db_port: u16,

    /// Connections kept in the shared pool.
    #[arg(long, default_value_t = 4)]
    pool_size: usize,

    /// Directory for the per-strategy CSV log files.
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,
}

struct InstrumentFeed {
    id: String,
    messages: Vec<Message>,
    train_messages: Vec<Message>,
}

/// One entry of the JSON instrument config.
#[derive(Debug, Deserialize)]
struct FeedPaths {
    backtest: String,
    #[serde(default)]
    train: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(Args::parse()) {
        Ok(()) => {}
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

fn run(args: Args) -> Result<(), BacktestError> {
    if STRATEGY_NAMES.get(args.strategy).is_none() {
        return Err(BacktestError::UnknownStrategy {
            index: args.strategy,
        });
    }

    let session = match &args.session {
        Some(raw) => Some(parse_session(raw)?),
        None => None,
    };

    let mut feeds = args
        .instruments
        .iter()
        .map(|spec| parse_feed_spec(spec))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(config) = &args.config {
        feeds.extend(load_config(config)?);
    }

    if args.ingest_only {
        for feed in &feeds {
            let report = run_ingest(&feed.id, &feed.messages).map_err(BacktestError::Book)?;
            println!(
                "{}: {} messages in {:.3}s ({:.0} msgs/s, {} resting)",
                report.instrument,
                report.messages,
                report.elapsed.as_secs_f64(),
                report.msgs_per_sec(),
                report.resting_orders,
            );
        }
        return Ok(());
    }

    let pool = ConnectionPool::shared(&args.db_host, args.db_port, args.pool_size)?;

    let mut coordinator = ConcurrentBacktester::new(Arc::clone(&pool)).with_log_dir(&args.log_dir);
    for feed in feeds {
        let session_bounds = session
            .as_ref()
            .map(|(start, end)| (start.as_str(), end.as_str()));
        coordinator.add_instrument(
            &feed.id,
            feed.messages,
            feed.train_messages,
            session_bounds,
        )?;
    }

    coordinator.start(args.strategy)?;
    let results = coordinator.join();
    pool.close();

    let mut failed = false;
    for (instrument, outcome) in results {
        match outcome {
            Ok(summary) => {
                info!(
                    instrument = %instrument,
                    messages = summary.messages_processed,
                    trades = summary.trades,
                    pnl = summary.pnl,
                    "run finished"
                );
                println!(
                    "{instrument}: {} messages, {} trades, pnl {}",
                    summary.messages_processed, summary.trades, summary.pnl
                );
                if let Some(report) = summary.file_log
                    && report.dropped > 0
                {
                    eprintln!("{instrument}: {} file log records dropped", report.dropped);
                }
            }
            Err(e) => {
                failed = true;
                eprintln!("{instrument}: {e}");
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn parse_feed_spec(spec: &str) -> Result<InstrumentFeed, BacktestError> {
    let (id, paths) = spec.split_once('=').ok_or_else(|| invalid_spec(spec))?;
    if id.is_empty() || paths.is_empty() {
        return Err(invalid_spec(spec));
    }

    let (backtest_path, train_path) = match paths.split_once(':') {
        Some((b, t)) => (b, Some(t)),
        None => (paths, None),
    };

    info!(instrument = id, path = backtest_path, "parsing feed");
    let messages = parse_file(backtest_path).map_err(BacktestError::Feed)?;
    let train_messages = match train_path {
        Some(path) => {
            info!(instrument = id, path, "parsing training feed");
            parse_file(path).map_err(BacktestError::Feed)?
        }
        None => Vec::new(),
    };

    Ok(InstrumentFeed {
        id: id.to_string(),
        messages,
        train_messages,
    })
}

fn load_config(path: &PathBuf) -> Result<Vec<InstrumentFeed>, BacktestError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        BacktestError::Feed(FeedError::Io {
            path: path.clone(),
            message: e.to_string(),
        })
    })?;
    let entries: BTreeMap<String, FeedPaths> = serde_json::from_str(&raw).map_err(|e| {
        BacktestError::Feed(FeedError::Malformed {
            line: 0,
            reason: format!("config {}: {e}", path.display()),
        })
    })?;

    let mut feeds = Vec::with_capacity(entries.len());
    for (id, paths) in entries {
        info!(instrument = %id, path = %paths.backtest, "parsing feed");
        let messages = parse_file(&paths.backtest).map_err(BacktestError::Feed)?;
        let train_messages = match &paths.train {
            Some(path) => parse_file(path).map_err(BacktestError::Feed)?,
            None => Vec::new(),
        };
        feeds.push(InstrumentFeed {
            id,
            messages,
            train_messages,
        });
    }
    Ok(feeds)
}

fn invalid_spec(spec: &str) -> BacktestError {
    BacktestError::Feed(FeedError::Malformed {
        line: 0,
        reason: format!("instrument spec {spec:?} is not ID=PATH[:TRAIN_PATH]"),
    })
}

fn parse_session(raw: &str) -> Result<(String, String), BacktestError> {
    let (start, end) = raw
        .split_once('-')
        .ok_or_else(|| BacktestError::InvalidSessionTime {
            value: raw.to_string(),
        })?;
    Ok((start.to_string(), end.to_string()))
}
