//! The L3 order book engine.
//!
//! [`OrderBook`] reconstructs one instrument's book from a stream of MBO
//! messages. Orders and price levels live in typed pools and are wired
//! together with an intrusive FIFO per level; two Robin Hood tables give O(1)
//! access by order id and by `(price, side)`. All mutation happens on the
//! owning replay thread — there are no locks anywhere in the structure.

use super::error::BookError;
use super::limit::LevelOrders;
use super::lookup::OpenAddressTable;
use super::order::{LimitRef, Order, OrderRef};
use super::pool::{LimitPool, OrderPool};
use super::side::BookSide;
use crate::feed::{Action, Message, Side};
use bitflags::bitflags;
use tracing::warn;

/// Capacity of the rolling mid-price buffer.
pub const MID_PRICE_BUFFER: usize = 40_000;

/// Default pre-sizing for order storage and lookup.
const DEFAULT_ORDER_CAPACITY: usize = 1 << 16;

/// Default pre-sizing for price levels per side.
const DEFAULT_LEVEL_CAPACITY: usize = 1 << 10;

bitflags! {
    /// Selects which derived analytics [`OrderBook::refresh`] recomputes.
    ///
    /// Analytics are never updated as a side effect of message processing;
    /// a strategy asks for exactly the set it consumes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AnalyticsFlags: u8 {
        /// Top-N depth sums per side.
        const VOLS = 1 << 0;
        /// Normalized bid/ask depth imbalance (needs `VOLS`).
        const IMBALANCE = 1 << 1;
        /// Volume-order imbalance signal.
        const VOI = 1 << 2;
        /// Log-depth skew at the touch.
        const SKEW = 1 << 3;
        /// Record the current mid price into the rolling buffer.
        const MID = 1 << 4;
    }
}

/// A full market-by-order book for one instrument.
pub struct OrderBook {
    instrument: String,

    orders: OrderPool,
    limits: LimitPool,
    bids: BookSide,
    asks: BookSide,

    /// order id -> order handle.
    order_lookup: OpenAddressTable<u32>,
    /// packed (price, side) -> level handle.
    limit_lookup: OpenAddressTable<u32>,

    bid_count: u64,
    ask_count: u64,
    message_count: u64,
    current_time_ns: u64,

    // Rolling analytics, derived on request.
    vwap_num: f64,
    vwap_den: f64,
    vwap: f64,
    mid_prices: Vec<i32>,
    mid_write_index: usize,
    mid_stored: usize,
    voi_history: Vec<i64>,
    voi: i64,
    prev_best_bid: i32,
    prev_best_ask: i32,
    prev_best_bid_volume: i64,
    prev_best_ask_volume: i64,
    bid_vol: i64,
    ask_vol: i64,
    imbalance: f64,
    skew: f64,
    depth_ready: bool,
}

impl OrderBook {
    /// Create a book with default capacity hints.
    ///
    /// # Errors
    ///
    /// Returns [`BookError`] when the lookup arenas cannot be mapped.
    pub fn new(instrument: &str) -> Result<Self, BookError> {
        Self::with_capacity(instrument, DEFAULT_ORDER_CAPACITY, DEFAULT_LEVEL_CAPACITY)
    }

    /// Create a book sized for an expected peak of `orders` live orders and
    /// `levels` price levels per side.
    ///
    /// # Errors
    ///
    /// Returns [`BookError`] when the lookup arenas cannot be mapped.
    pub fn with_capacity(
        instrument: &str,
        orders: usize,
        levels: usize,
    ) -> Result<Self, BookError> {
        Ok(Self {
            instrument: instrument.to_string(),
            orders: OrderPool::with_capacity(orders),
            limits: LimitPool::with_capacity(levels),
            bids: BookSide::with_capacity(Side::Bid, levels),
            asks: BookSide::with_capacity(Side::Ask, levels),
            order_lookup: OpenAddressTable::with_capacity(orders)?,
            limit_lookup: OpenAddressTable::with_capacity(levels * 2)?,
            bid_count: 0,
            ask_count: 0,
            message_count: 0,
            current_time_ns: 0,
            vwap_num: 0.0,
            vwap_den: 0.0,
            vwap: 0.0,
            mid_prices: vec![0; MID_PRICE_BUFFER],
            mid_write_index: 0,
            mid_stored: 0,
            voi_history: Vec::with_capacity(MID_PRICE_BUFFER),
            voi: 0,
            prev_best_bid: 0,
            prev_best_ask: 0,
            prev_best_bid_volume: 0,
            prev_best_ask_volume: 0,
            bid_vol: 0,
            ask_vol: 0,
            imbalance: 0.0,
            skew: 0.0,
            depth_ready: false,
        })
    }

    /// The instrument this book tracks.
    #[must_use]
    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    // ─── Message processing ─────────────────────────────────────────────

    /// Apply one MBO message.
    ///
    /// - `Add` creates an order at the back of its level's FIFO.
    /// - `Cancel` removes it; a cancel for an unknown id is logged and
    ///   dropped.
    /// - `Modify` for an unknown id is promoted to an `Add`. A price change
    ///   cancels and re-adds (time priority lost). At the same price, a size
    ///   increase moves the order to the back of the queue; a size decrease
    ///   shrinks it in place.
    /// - `Trade` never matches against the book; it only feeds the VWAP
    ///   accumulators.
    ///
    /// # Errors
    ///
    /// Returns [`BookError`] only when a lookup table can no longer grow
    /// within its arena.
    pub fn process_msg(&mut self, msg: &Message) -> Result<(), BookError> {
        self.message_count += 1;
        self.current_time_ns = msg.timestamp_ns;

        match msg.action {
            Action::Add => self.add_order(
                msg.order_id,
                msg.price,
                msg.size,
                msg.side,
                msg.timestamp_ns,
            )?,
            Action::Cancel => self.cancel_order(msg.order_id),
            Action::Modify => self.modify_order(
                msg.order_id,
                msg.price,
                msg.size,
                msg.side,
                msg.timestamp_ns,
            )?,
            Action::Trade => self.calculate_vwap(msg.price, msg.size),
        }
        Ok(())
    }

    fn add_order(
        &mut self,
        id: u64,
        price: i32,
        size: u32,
        side: Side,
        timestamp_ns: u64,
    ) -> Result<(), BookError> {
        let oref = self.orders.acquire(id, price, size, side, timestamp_ns);
        let lref = self.get_or_insert_level(price, side)?;
        self.limits.get_mut(lref).push_back(oref, &mut self.orders);
        self.orders.get_mut(oref).parent = lref;
        self.order_lookup.insert(id, oref.raw())?;

        match side {
            Side::Bid => self.bid_count += 1,
            Side::Ask => self.ask_count += 1,
        }
        Ok(())
    }

    fn cancel_order(&mut self, id: u64) {
        let Some(raw) = self.order_lookup.get(id) else {
            warn!(
                instrument = %self.instrument,
                order_id = id,
                "cancel for unknown order dropped"
            );
            return;
        };
        self.order_lookup.erase(id);
        self.remove_resting_order(OrderRef::from_raw(raw));
    }

    fn modify_order(
        &mut self,
        id: u64,
        new_price: i32,
        new_size: u32,
        side: Side,
        timestamp_ns: u64,
    ) -> Result<(), BookError> {
        let Some(raw) = self.order_lookup.get(id) else {
            // Seen when the session starts mid-stream: the original add
            // predates our replay window.
            return self.add_order(id, new_price, new_size, side, timestamp_ns);
        };
        let oref = OrderRef::from_raw(raw);
        let (old_price, old_size, lref) = {
            let order = self.orders.get(oref);
            (order.price, order.size, order.parent)
        };

        if old_price != new_price {
            // Price change: cancel and re-add at the new level.
            self.order_lookup.erase(id);
            self.remove_resting_order(oref);
            return self.add_order(id, new_price, new_size, side, timestamp_ns);
        }

        if new_size > old_size {
            // Size up at the same price loses time priority.
            self.limits.get_mut(lref).unlink(oref, &mut self.orders);
            {
                let order = self.orders.get_mut(oref);
                order.size = new_size;
                order.timestamp_ns = timestamp_ns;
            }
            self.limits.get_mut(lref).push_back(oref, &mut self.orders);
        } else {
            // Size down (or unchanged) keeps the queue position.
            self.limits.get_mut(lref).volume -= i64::from(old_size) - i64::from(new_size);
            let order = self.orders.get_mut(oref);
            order.size = new_size;
            order.timestamp_ns = timestamp_ns;
        }
        Ok(())
    }

    /// Unlink a live order from its level, destroying the level if it
    /// empties, and return the record to the pool.
    fn remove_resting_order(&mut self, oref: OrderRef) {
        let (lref, price, side) = {
            let order = self.orders.get(oref);
            (order.parent, order.price, order.side)
        };

        self.limits.get_mut(lref).unlink(oref, &mut self.orders);
        if self.limits.get(lref).is_empty() {
            self.destroy_level(lref, price, side);
        }

        match side {
            Side::Bid => self.bid_count -= 1,
            Side::Ask => self.ask_count -= 1,
        }
        self.orders.release(oref);
    }

    /// Tear down an empty level: sorted side first, then the lookup, then
    /// the pool, so no lookup can ever observe a pooled level.
    fn destroy_level(&mut self, lref: LimitRef, price: i32, side: Side) {
        self.side_mut(side).remove(price);
        self.limit_lookup.erase(limit_key(price, side));
        self.limits.release(lref);
    }

    fn get_or_insert_level(&mut self, price: i32, side: Side) -> Result<LimitRef, BookError> {
        let key = limit_key(price, side);
        if let Some(raw) = self.limit_lookup.get(key) {
            return Ok(LimitRef::from_raw(raw));
        }

        let lref = self.limits.acquire(price, side);
        self.side_mut(side).insert(price, lref);
        self.limit_lookup.insert(key, lref.raw())?;
        Ok(lref)
    }

    fn side(&self, side: Side) -> &BookSide {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    // ─── Read interface ─────────────────────────────────────────────────

    /// Best (highest) bid price, if any.
    #[must_use]
    pub fn best_bid_price(&self) -> Option<i32> {
        self.bids.best().map(|(p, _)| p)
    }

    /// Best (lowest) ask price, if any.
    #[must_use]
    pub fn best_ask_price(&self) -> Option<i32> {
        self.asks.best().map(|(p, _)| p)
    }

    /// Resting volume at the best bid; zero when the side is empty.
    #[must_use]
    pub fn best_bid_volume(&self) -> i64 {
        self.bids
            .best()
            .map_or(0, |(_, l)| self.limits.get(l).volume)
    }

    /// Resting volume at the best ask; zero when the side is empty.
    #[must_use]
    pub fn best_ask_volume(&self) -> i64 {
        self.asks
            .best()
            .map_or(0, |(_, l)| self.limits.get(l).volume)
    }

    /// Mid price in ticks; defined only when both sides are populated.
    #[must_use]
    pub fn mid_price(&self) -> Option<i32> {
        match (self.best_bid_price(), self.best_ask_price()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2),
            _ => None,
        }
    }

    /// Price and volume of the level `depth` steps inside the best.
    #[must_use]
    pub fn level_at(&self, side: Side, depth: usize) -> Option<(i32, i64)> {
        self.side(side)
            .at_depth(depth)
            .map(|(p, l)| (p, self.limits.get(l).volume))
    }

    /// Number of price levels on one side.
    #[must_use]
    pub fn level_count(&self, side: Side) -> usize {
        self.side(side).len()
    }

    /// Total live orders across both sides.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.bid_count + self.ask_count
    }

    /// Live orders on one side.
    #[must_use]
    pub fn side_count(&self, side: Side) -> u64 {
        match side {
            Side::Bid => self.bid_count,
            Side::Ask => self.ask_count,
        }
    }

    /// Look up a live order by id.
    #[must_use]
    pub fn order(&self, id: u64) -> Option<&Order> {
        self.order_lookup
            .get(id)
            .map(|raw| self.orders.get(OrderRef::from_raw(raw)))
    }

    /// Iterate the FIFO of the level `depth` steps inside the best.
    #[must_use]
    pub fn level_orders(&self, side: Side, depth: usize) -> Option<LevelOrders<'_>> {
        self.side(side)
            .at_depth(depth)
            .map(|(_, l)| self.limits.get(l).iter(&self.orders))
    }

    /// Timestamp of the last processed message, nanoseconds since the epoch.
    #[must_use]
    pub fn current_time_ns(&self) -> u64 {
        self.current_time_ns
    }

    /// Messages processed since the last reset.
    #[must_use]
    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    // ─── Analytics ──────────────────────────────────────────────────────

    /// Recompute the analytics selected by `flags`, scanning up to `depth`
    /// levels per side for the depth sums.
    pub fn refresh(&mut self, flags: AnalyticsFlags, depth: usize) {
        if flags.contains(AnalyticsFlags::VOLS) {
            self.calculate_vols(depth);
        }
        if flags.contains(AnalyticsFlags::IMBALANCE) {
            self.calculate_imbalance();
        }
        if flags.contains(AnalyticsFlags::VOI) {
            self.calculate_voi();
        }
        if flags.contains(AnalyticsFlags::SKEW) {
            self.calculate_skew();
        }
        if flags.contains(AnalyticsFlags::MID) {
            self.record_mid_price();
        }
    }

    /// Sum resting volume over up to the top `depth` levels per side.
    pub fn calculate_vols(&mut self, depth: usize) {
        self.bid_vol = self
            .bids
            .iter_best_first()
            .take(depth)
            .map(|(_, l)| self.limits.get(l).volume)
            .sum();
        self.ask_vol = self
            .asks
            .iter_best_first()
            .take(depth)
            .map(|(_, l)| self.limits.get(l).volume)
            .sum();
        self.depth_ready = true;
    }

    /// Normalized depth imbalance over the last computed depth sums.
    pub fn calculate_imbalance(&mut self) -> f64 {
        let total = self.bid_vol + self.ask_vol;
        self.imbalance = if total == 0 {
            0.0
        } else {
            (self.bid_vol - self.ask_vol) as f64 / total as f64
        };
        self.imbalance
    }

    /// Volume-order imbalance (Cont/Kukanov).
    ///
    /// With Δb the change of the best bid and Δa the change of the best ask
    /// since the previous call: the bid contributes its full best volume when
    /// Δb > 0, the volume change when Δb = 0, and nothing when Δb < 0; the
    /// ask mirrors with the signs flipped. The signal is the bid contribution
    /// minus the ask contribution, appended to the history.
    pub fn calculate_voi(&mut self) {
        let (Some(best_bid), Some(best_ask)) = (self.best_bid_price(), self.best_ask_price())
        else {
            return;
        };
        let bid_volume = self.best_bid_volume();
        let ask_volume = self.best_ask_volume();

        let bid_delta = best_bid - self.prev_best_bid;
        let ask_delta = best_ask - self.prev_best_ask;

        let bid_contribution = match bid_delta {
            d if d > 0 => bid_volume,
            0 => bid_volume - self.prev_best_bid_volume,
            _ => 0,
        };
        let ask_contribution = match ask_delta {
            d if d < 0 => ask_volume,
            0 => ask_volume - self.prev_best_ask_volume,
            _ => 0,
        };

        self.voi = bid_contribution - ask_contribution;
        self.voi_history.push(self.voi);

        self.prev_best_bid = best_bid;
        self.prev_best_ask = best_ask;
        self.prev_best_bid_volume = bid_volume;
        self.prev_best_ask_volume = ask_volume;
    }

    /// Fold a trade print into the running VWAP.
    pub fn calculate_vwap(&mut self, price: i32, size: u32) {
        self.vwap_num += f64::from(price) * f64::from(size);
        self.vwap_den += f64::from(size);
        if self.vwap_den > 0.0 {
            self.vwap = self.vwap_num / self.vwap_den;
        }
    }

    /// Log-depth skew at the touch. Unchanged when either side is empty.
    pub fn calculate_skew(&mut self) {
        let bid_depth = self.best_bid_volume() as f64;
        let ask_depth = self.best_ask_volume() as f64;
        if bid_depth > 0.0 && ask_depth > 0.0 {
            self.skew = bid_depth.log10() - ask_depth.log10();
        }
    }

    /// Push the current mid price into the rolling buffer.
    ///
    /// The write index advances on every push and wraps at the buffer size;
    /// once full, the oldest sample is overwritten.
    pub fn record_mid_price(&mut self) {
        let Some(mid) = self.mid_price() else {
            return;
        };
        self.mid_prices[self.mid_write_index] = mid;
        self.mid_write_index = (self.mid_write_index + 1) % MID_PRICE_BUFFER;
        self.mid_stored = (self.mid_stored + 1).min(MID_PRICE_BUFFER);
    }

    /// The mid price recorded `back` pushes ago (0 is the most recent).
    #[must_use]
    pub fn mid_price_back(&self, back: usize) -> Option<i32> {
        if back >= self.mid_stored {
            return None;
        }
        let idx = (self.mid_write_index + MID_PRICE_BUFFER - 1 - back) % MID_PRICE_BUFFER;
        Some(self.mid_prices[idx])
    }

    /// Number of mid prices currently held in the rolling buffer.
    #[must_use]
    pub fn mid_price_samples(&self) -> usize {
        self.mid_stored
    }

    /// Running volume-weighted average trade price.
    #[must_use]
    pub fn vwap(&self) -> f64 {
        self.vwap
    }

    /// Last computed depth imbalance.
    #[must_use]
    pub fn imbalance(&self) -> f64 {
        self.imbalance
    }

    /// Last computed log-depth skew.
    #[must_use]
    pub fn skew(&self) -> f64 {
        self.skew
    }

    /// Last computed VOI sample.
    #[must_use]
    pub fn voi(&self) -> i64 {
        self.voi
    }

    /// Every VOI sample since the last reset.
    #[must_use]
    pub fn voi_history(&self) -> &[i64] {
        &self.voi_history
    }

    /// Last computed top-N bid depth.
    #[must_use]
    pub fn bid_vol(&self) -> i64 {
        self.bid_vol
    }

    /// Last computed top-N ask depth.
    #[must_use]
    pub fn ask_vol(&self) -> i64 {
        self.ask_vol
    }

    /// Whether `calculate_vols` has run since the last reset.
    #[must_use]
    pub fn depth_ready(&self) -> bool {
        self.depth_ready
    }

    /// Peak simultaneous live orders seen by the pool.
    #[must_use]
    pub fn order_high_water(&self) -> usize {
        self.orders.high_water()
    }

    /// Pool accounting: live orders currently acquired.
    #[must_use]
    pub fn orders_live(&self) -> usize {
        self.orders.live()
    }

    // ─── Reset ──────────────────────────────────────────────────────────

    /// Return every order and level to the pools, clear both sides and both
    /// lookups, and zero all analytics. Pool and table capacities are
    /// preserved so the next run starts allocation-free.
    pub fn reset(&mut self) {
        self.orders.recycle_all();
        self.limits.recycle_all();
        self.bids.clear();
        self.asks.clear();
        self.order_lookup.clear();
        self.limit_lookup.clear();

        self.bid_count = 0;
        self.ask_count = 0;
        self.message_count = 0;
        self.current_time_ns = 0;

        self.vwap_num = 0.0;
        self.vwap_den = 0.0;
        self.vwap = 0.0;
        self.mid_write_index = 0;
        self.mid_stored = 0;
        self.voi_history.clear();
        self.voi = 0;
        self.prev_best_bid = 0;
        self.prev_best_ask = 0;
        self.prev_best_bid_volume = 0;
        self.prev_best_ask_volume = 0;
        self.bid_vol = 0;
        self.ask_vol = 0;
        self.imbalance = 0.0;
        self.skew = 0.0;
        self.depth_ready = false;
    }
}

impl std::fmt::Debug for OrderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBook")
            .field("instrument", &self.instrument)
            .field("orders", &self.count())
            .field("bid_levels", &self.bids.len())
            .field("ask_levels", &self.asks.len())
            .field("best_bid", &self.best_bid_price())
            .field("best_ask", &self.best_ask_price())
            .finish()
    }
}

/// Pack `(price, side)` into the limit-lookup key: the price's bit pattern
/// shifted left one, with the side in the low bit.
#[inline]
fn limit_key(price: i32, side: Side) -> u64 {
    (u64::from(price as u32) << 1) | side.key_bit()
}
