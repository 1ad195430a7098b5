//! Shared helpers for the integration tests.

use mbo_backtest::prelude::*;
use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::mpsc;

/// A throwaway line-protocol sink on a loopback port.
///
/// Accepts any number of connections, reads each to EOF, and forwards the
/// received payloads over a channel.
pub struct MockSink {
    pub port: u16,
    payloads: mpsc::Receiver<String>,
}

impl MockSink {
    pub fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap_or_else(|e| panic!("bind: {e}"));
        let port = listener
            .local_addr()
            .unwrap_or_else(|e| panic!("addr: {e}"))
            .port();
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let tx = tx.clone();
                std::thread::spawn(move || {
                    let payload = read_to_end(stream);
                    let _ = tx.send(payload);
                });
            }
        });

        Self { port, payloads: rx }
    }

    /// Collect everything received on connections closed so far.
    pub fn drain(&self, connections: usize) -> String {
        let mut all = String::new();
        for _ in 0..connections {
            if let Ok(payload) = self
                .payloads
                .recv_timeout(std::time::Duration::from_secs(10))
            {
                all.push_str(&payload);
            }
        }
        all
    }
}

fn read_to_end(mut stream: TcpStream) -> String {
    let mut buf = String::new();
    let _ = stream.read_to_string(&mut buf);
    buf
}

/// A connection pool wired to a fresh mock sink.
pub fn sink_and_pool(capacity: usize) -> (MockSink, Arc<ConnectionPool>) {
    let sink = MockSink::spawn();
    let pool = ConnectionPool::connect("127.0.0.1", sink.port, capacity)
        .unwrap_or_else(|e| panic!("pool: {e}"));
    (sink, pool)
}

pub fn add(id: u64, price: i32, size: u32, side: Side, t: u64) -> Message {
    Message::new(id, t, size, price, Action::Add, side)
}

pub fn trade(price: i32, size: u32, t: u64) -> Message {
    Message::new(0, t, size, price, Action::Trade, Side::Bid)
}

/// A message sequence that makes the imbalance strategy buy exactly once:
/// heavy bid depth, mid below VWAP, then a top-of-book change to trigger the
/// callback.
pub fn one_buy_sequence() -> Vec<Message> {
    vec![
        add(1, 100, 10, Side::Bid, 1_000_000_000),
        add(2, 102, 1, Side::Ask, 2_000_000_000),
        trade(105, 1, 3_000_000_000),
        add(3, 100, 5, Side::Bid, 4_000_000_000),
    ]
}
