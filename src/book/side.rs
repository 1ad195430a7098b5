//! One side of the book: a sorted sequence of price levels.
//!
//! Levels are kept in a contiguous vector sorted ascending by price — the
//! best bid is the last entry of the bid side, the best ask the first entry
//! of the ask side. Level birth and death are rare next to hits on existing
//! levels (which go through the limit lookup), so the O(N) shifts on
//! insert/erase lose to the contiguous layout's wins on every scan.

use super::order::LimitRef;
use crate::feed::Side;
use either::Either;

/// Sorted `(price, level)` sequence for one side of the book.
#[derive(Debug)]
pub struct BookSide {
    levels: Vec<(i32, LimitRef)>,
    side: Side,
}

impl BookSide {
    /// Create an empty side.
    #[must_use]
    pub fn new(side: Side) -> Self {
        Self {
            levels: Vec::new(),
            side,
        }
    }

    /// Create an empty side with space reserved for `levels` entries.
    #[must_use]
    pub fn with_capacity(side: Side, levels: usize) -> Self {
        Self {
            levels: Vec::with_capacity(levels),
            side,
        }
    }

    /// Which side this is.
    #[must_use]
    pub fn side(&self) -> Side {
        self.side
    }

    /// Number of price levels present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// True when no levels are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Insert a newborn level at its sorted position.
    ///
    /// Callers guarantee the price is absent; duplicates would break the
    /// strict monotonicity invariant.
    pub fn insert(&mut self, price: i32, lref: LimitRef) {
        match self.position(price) {
            Ok(_) => debug_assert!(false, "duplicate price level {price}"),
            Err(at) => self.levels.insert(at, (price, lref)),
        }
    }

    /// Remove a dying level, returning its handle.
    pub fn remove(&mut self, price: i32) -> Option<LimitRef> {
        match self.position(price) {
            Ok(at) => Some(self.levels.remove(at).1),
            Err(_) => None,
        }
    }

    /// The best level: highest price for bids, lowest for asks.
    #[must_use]
    pub fn best(&self) -> Option<(i32, LimitRef)> {
        match self.side {
            Side::Bid => self.levels.last().copied(),
            Side::Ask => self.levels.first().copied(),
        }
    }

    /// The level `depth` steps inside the best (0 is the best level).
    #[must_use]
    pub fn at_depth(&self, depth: usize) -> Option<(i32, LimitRef)> {
        match self.side {
            Side::Bid => self
                .levels
                .len()
                .checked_sub(depth + 1)
                .and_then(|i| self.levels.get(i))
                .copied(),
            Side::Ask => self.levels.get(depth).copied(),
        }
    }

    /// Iterate levels best-first: descending prices for bids, ascending for
    /// asks.
    pub fn iter_best_first(&self) -> impl Iterator<Item = (i32, LimitRef)> + '_ {
        match self.side {
            Side::Bid => Either::Left(self.levels.iter().rev().copied()),
            Side::Ask => Either::Right(self.levels.iter().copied()),
        }
    }

    /// Drop every level reference.
    pub fn clear(&mut self) {
        self.levels.clear();
    }

    /// Binary search for `price` in the ascending sequence.
    fn position(&self, price: i32) -> Result<usize, usize> {
        self.levels.binary_search_by_key(&price, |&(p, _)| p)
    }
}
