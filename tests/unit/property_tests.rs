//! Model-based property tests for the book engine.
//!
//! A reference model made of plain maps and vectors applies the same
//! semantics as the book (FIFO per level, modify promotion, priority rules);
//! random operation sequences must leave both in identical shape.

use mbo_backtest::{Action, Message, OrderBook, Side};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
enum Op {
    Add { id: u64, price: i32, size: u32 },
    Cancel { id: u64 },
    Modify { id: u64, price: i32, size: u32 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let id = 0u64..24;
    let price = 95i32..106;
    let size = 1u32..50;
    prop_oneof![
        (id.clone(), price.clone(), size.clone())
            .prop_map(|(id, price, size)| Op::Add { id, price, size }),
        id.clone().prop_map(|id| Op::Cancel { id }),
        (id, price, size).prop_map(|(id, price, size)| Op::Modify { id, price, size }),
    ]
}

/// Side is a function of the id so an id never flips sides.
fn side_of(id: u64) -> Side {
    if id % 2 == 0 { Side::Bid } else { Side::Ask }
}

#[derive(Default)]
struct Model {
    /// id -> (price, size)
    orders: HashMap<u64, (i32, u32)>,
    /// (side bit, price) -> FIFO of ids
    queues: BTreeMap<(u8, i32), Vec<u64>>,
}

impl Model {
    fn queue(&mut self, side: Side, price: i32) -> &mut Vec<u64> {
        self.queues.entry((side as u8, price)).or_default()
    }

    fn remove_from_queue(&mut self, side: Side, price: i32, id: u64) {
        let key = (side as u8, price);
        if let Some(q) = self.queues.get_mut(&key) {
            q.retain(|&x| x != id);
            if q.is_empty() {
                self.queues.remove(&key);
            }
        }
    }

    fn add(&mut self, id: u64, price: i32, size: u32) {
        self.orders.insert(id, (price, size));
        self.queue(side_of(id), price).push(id);
    }

    fn cancel(&mut self, id: u64) {
        if let Some((price, _)) = self.orders.remove(&id) {
            self.remove_from_queue(side_of(id), price, id);
        }
    }

    fn modify(&mut self, id: u64, new_price: i32, new_size: u32) {
        let Some(&(old_price, old_size)) = self.orders.get(&id) else {
            self.add(id, new_price, new_size);
            return;
        };
        if old_price != new_price {
            self.remove_from_queue(side_of(id), old_price, id);
            self.add(id, new_price, new_size);
        } else if new_size > old_size {
            self.remove_from_queue(side_of(id), old_price, id);
            self.orders.insert(id, (old_price, new_size));
            self.queue(side_of(id), old_price).push(id);
        } else {
            self.orders.insert(id, (old_price, new_size));
        }
    }
}

/// Convert an op sequence into messages, dropping adds that would duplicate
/// a live id (a well-formed MBO feed never re-adds a live order).
fn to_messages(ops: &[Op]) -> Vec<Message> {
    let mut live: HashMap<u64, ()> = HashMap::new();
    let mut messages = Vec::with_capacity(ops.len());
    for (t, op) in ops.iter().enumerate() {
        let t = t as u64;
        match *op {
            Op::Add { id, price, size } => {
                if live.insert(id, ()).is_none() {
                    messages.push(Message::new(id, t, size, price, Action::Add, side_of(id)));
                }
            }
            Op::Cancel { id } => {
                live.remove(&id);
                messages.push(Message::new(id, t, 0, 0, Action::Cancel, side_of(id)));
            }
            Op::Modify { id, price, size } => {
                live.insert(id, ());
                messages.push(Message::new(id, t, size, price, Action::Modify, side_of(id)));
            }
        }
    }
    messages
}

fn model_of(messages: &[Message]) -> Model {
    let mut model = Model::default();
    for msg in messages {
        match msg.action {
            Action::Add => model.add(msg.order_id, msg.price, msg.size),
            Action::Cancel => model.cancel(msg.order_id),
            Action::Modify => model.modify(msg.order_id, msg.price, msg.size),
            Action::Trade => {}
        }
    }
    model
}

/// Walk every level of the book into `(side bit, price) -> (ids, volume)`.
fn book_shape(book: &OrderBook) -> BTreeMap<(u8, i32), (Vec<u64>, i64)> {
    let mut shape = BTreeMap::new();
    for side in [Side::Bid, Side::Ask] {
        let mut depth = 0;
        while let Some((price, volume)) = book.level_at(side, depth) {
            let ids: Vec<u64> = book
                .level_orders(side, depth)
                .map(|it| it.map(|o| o.id).collect())
                .unwrap_or_default();
            shape.insert((side as u8, price), (ids, volume));
            depth += 1;
        }
    }
    shape
}

fn replay(messages: &[Message]) -> OrderBook {
    let mut book =
        OrderBook::with_capacity("PROP", 1 << 10, 64).unwrap_or_else(|e| panic!("book: {e}"));
    for msg in messages {
        book.process_msg(msg).unwrap_or_else(|e| panic!("process: {e}"));
    }
    book
}

proptest! {
    #[test]
    fn prop_book_matches_reference_model(ops in proptest::collection::vec(op_strategy(), 1..200)) {
        let messages = to_messages(&ops);
        let book = replay(&messages);
        let model = model_of(&messages);

        // Same live-order population.
        prop_assert_eq!(book.count(), model.orders.len() as u64);

        // Same level topology: prices, FIFO order, and aggregated volume.
        let shape = book_shape(&book);
        prop_assert_eq!(shape.len(), model.queues.len());
        for (key, ids) in &model.queues {
            let (book_ids, volume) = shape
                .get(key)
                .unwrap_or_else(|| panic!("missing level {key:?}"));
            prop_assert_eq!(book_ids, ids);
            let model_volume: i64 = ids
                .iter()
                .map(|id| i64::from(model.orders.get(id).map(|&(_, s)| s).unwrap_or(0)))
                .sum();
            prop_assert_eq!(*volume, model_volume);
        }
    }

    #[test]
    fn prop_replay_reset_replay_is_deterministic(ops in proptest::collection::vec(op_strategy(), 1..150)) {
        let messages = to_messages(&ops);
        let mut book =
            OrderBook::with_capacity("PROP", 1 << 10, 64).unwrap_or_else(|e| panic!("book: {e}"));

        for msg in &messages {
            book.process_msg(msg).unwrap_or_else(|e| panic!("process: {e}"));
        }
        let first = book_shape(&book);
        let first_count = book.count();

        book.reset();
        prop_assert_eq!(book.count(), 0);

        for msg in &messages {
            book.process_msg(msg).unwrap_or_else(|e| panic!("process: {e}"));
        }
        prop_assert_eq!(book_shape(&book), first);
        prop_assert_eq!(book.count(), first_count);
    }

    #[test]
    fn prop_sides_strictly_sorted(ops in proptest::collection::vec(op_strategy(), 1..200)) {
        let messages = to_messages(&ops);
        let book = replay(&messages);

        for side in [Side::Bid, Side::Ask] {
            let mut prices = Vec::new();
            let mut depth = 0;
            while let Some((price, volume)) = book.level_at(side, depth) {
                prop_assert!(volume > 0, "level {price} is empty but alive");
                prices.push(price);
                depth += 1;
            }
            // Best-first walk: strictly descending for bids, ascending for asks.
            for pair in prices.windows(2) {
                match side {
                    Side::Bid => prop_assert!(pair[0] > pair[1]),
                    Side::Ask => prop_assert!(pair[0] < pair[1]),
                }
            }
        }
    }
}
