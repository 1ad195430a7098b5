//! Order records and pool handles.

use crate::feed::Side;

/// Handle to an order record inside the order pool.
///
/// Handles are stable for the lifetime of the pool: growth appends chunks and
/// never moves existing records. `OrderRef::NONE` is the null handle used to
/// terminate the per-level FIFO list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderRef(pub(crate) u32);

impl OrderRef {
    /// The null handle.
    pub const NONE: OrderRef = OrderRef(u32::MAX);

    /// True when this is the null handle.
    #[inline]
    #[must_use]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// True when this handle points at a record.
    #[inline]
    #[must_use]
    pub fn is_some(self) -> bool {
        !self.is_none()
    }

    /// Raw index value, for storage in a lookup table.
    #[inline]
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Rebuild a handle from its raw index.
    #[inline]
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        OrderRef(raw)
    }
}

/// Handle to a price level record inside the limit pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LimitRef(pub(crate) u32);

impl LimitRef {
    /// The null handle.
    pub const NONE: LimitRef = LimitRef(u32::MAX);

    /// True when this is the null handle.
    #[inline]
    #[must_use]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// True when this handle points at a record.
    #[inline]
    #[must_use]
    pub fn is_some(self) -> bool {
        !self.is_none()
    }

    /// Raw index value, for storage in a lookup table.
    #[inline]
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Rebuild a handle from its raw index.
    #[inline]
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        LimitRef(raw)
    }
}

/// One live order.
///
/// A live order belongs to exactly one price level's intrusive FIFO:
/// `parent` names the level, `prev`/`next` are its neighbors in queue order.
/// `parent` is a back-reference only — it never extends the level's lifetime;
/// the book's discipline guarantees a level outlives all of its orders.
#[derive(Debug, Clone, Copy)]
pub struct Order {
    /// Venue-assigned order id.
    pub id: u64,
    /// Timestamp of the event that established the current queue position.
    pub timestamp_ns: u64,
    /// Price in integer ticks.
    pub price: i32,
    /// Remaining size in contracts.
    pub size: u32,
    /// Owning price level. Set iff the order is live.
    pub parent: LimitRef,
    /// Previous order in the level FIFO (closer to the front).
    pub prev: OrderRef,
    /// Next order in the level FIFO (closer to the back).
    pub next: OrderRef,
    /// Book side.
    pub side: Side,
    /// Set when the order was fully consumed by trades.
    pub filled: bool,
}

impl Order {
    /// Initialize a freshly acquired record for a new order.
    pub(crate) fn init(&mut self, id: u64, price: i32, size: u32, side: Side, timestamp_ns: u64) {
        self.id = id;
        self.price = price;
        self.size = size;
        self.side = side;
        self.timestamp_ns = timestamp_ns;
        self.parent = LimitRef::NONE;
        self.prev = OrderRef::NONE;
        self.next = OrderRef::NONE;
        self.filled = false;
    }
}

impl Default for Order {
    fn default() -> Self {
        Self {
            id: 0,
            timestamp_ns: 0,
            price: 0,
            size: 0,
            parent: LimitRef::NONE,
            prev: OrderRef::NONE,
            next: OrderRef::NONE,
            side: Side::Bid,
            filled: false,
        }
    }
}
