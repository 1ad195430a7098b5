//! Price level records.

use super::order::{Order, OrderRef};
use super::pool::OrderPool;
use crate::feed::Side;

/// All resting orders at one price on one side, queued first-in first-out.
///
/// The record is exactly one cache line so a best-level read touches a single
/// line. Padding is explicit; the layout assertion below keeps it honest.
#[repr(C, align(64))]
#[derive(Debug, Clone, Copy)]
pub struct Limit {
    /// Sum of the sizes of every order in the FIFO.
    pub volume: i64,
    /// Price in integer ticks.
    pub price: i32,
    /// Front of the FIFO (oldest order, first in time priority).
    pub head: OrderRef,
    /// Back of the FIFO (youngest order).
    pub tail: OrderRef,
    /// Book side.
    pub side: Side,
    _pad: [u8; 43],
}

const _: () = assert!(size_of::<Limit>() == 64);
const _: () = assert!(align_of::<Limit>() == 64);

impl Limit {
    /// Initialize a freshly acquired record for a new level.
    pub(crate) fn init(&mut self, price: i32, side: Side) {
        self.price = price;
        self.side = side;
        self.volume = 0;
        self.head = OrderRef::NONE;
        self.tail = OrderRef::NONE;
    }

    /// True when no orders rest at this level.
    ///
    /// Invariant: `head` and `tail` are null together, exactly when
    /// `volume == 0`.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Append an order to the back of the FIFO.
    pub(crate) fn push_back(&mut self, oref: OrderRef, orders: &mut OrderPool) {
        let tail = self.tail;
        {
            let order = orders.get_mut(oref);
            order.prev = tail;
            order.next = OrderRef::NONE;
        }
        if tail.is_some() {
            orders.get_mut(tail).next = oref;
        } else {
            self.head = oref;
        }
        self.tail = oref;
        self.volume += i64::from(orders.get(oref).size);
    }

    /// Unlink an order from anywhere in the FIFO in O(1).
    pub(crate) fn unlink(&mut self, oref: OrderRef, orders: &mut OrderPool) {
        let (prev, next, size) = {
            let order = orders.get(oref);
            (order.prev, order.next, order.size)
        };

        if prev.is_some() {
            orders.get_mut(prev).next = next;
        } else {
            self.head = next;
        }
        if next.is_some() {
            orders.get_mut(next).prev = prev;
        } else {
            self.tail = prev;
        }
        self.volume -= i64::from(size);
    }

    /// Iterate the FIFO front to back.
    pub fn iter<'a>(&self, orders: &'a OrderPool) -> LevelOrders<'a> {
        LevelOrders {
            orders,
            cursor: self.head,
        }
    }
}

impl Default for Limit {
    fn default() -> Self {
        Self {
            volume: 0,
            price: 0,
            head: OrderRef::NONE,
            tail: OrderRef::NONE,
            side: Side::Bid,
            _pad: [0; 43],
        }
    }
}

/// Iterator over the orders of one level in queue order.
pub struct LevelOrders<'a> {
    orders: &'a OrderPool,
    cursor: OrderRef,
}

impl<'a> Iterator for LevelOrders<'a> {
    type Item = &'a Order;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_none() {
            return None;
        }
        let order = self.orders.get(self.cursor);
        self.cursor = order.next;
        Some(order)
    }
}
