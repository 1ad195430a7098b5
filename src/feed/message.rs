//! Market-by-order event model.
//!
//! A [`Message`] is one MBO event as delivered by the feed: an add, cancel,
//! modify or trade for a single order. The replay engine assumes the input
//! vector is strictly non-decreasing in `timestamp_ns` and never re-sorts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The action carried by an MBO event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// A new order enters the book.
    Add,
    /// An existing order leaves the book.
    Cancel,
    /// An existing order changes price and/or size.
    Modify,
    /// A trade print. The engine never matches; trades only feed VWAP.
    Trade,
}

impl Action {
    /// Parse the single-character action code used by the CSV feed.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'A' => Some(Action::Add),
            b'C' => Some(Action::Cancel),
            b'M' => Some(Action::Modify),
            b'T' => Some(Action::Trade),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Add => write!(f, "A"),
            Action::Cancel => write!(f, "C"),
            Action::Modify => write!(f, "M"),
            Action::Trade => write!(f, "T"),
        }
    }
}

/// Which side of the book an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Side {
    /// Buy side.
    Bid = 0,
    /// Sell side.
    Ask = 1,
}

impl Side {
    /// Parse the single-character side code used by the CSV feed.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'B' => Some(Side::Bid),
            b'A' => Some(Side::Ask),
            _ => None,
        }
    }

    /// The opposite side.
    #[must_use]
    pub fn flip(self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    /// The low bit used when packing `(price, side)` into a lookup key.
    #[inline]
    pub(crate) fn key_bit(self) -> u64 {
        self as u64
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Bid => write!(f, "bid"),
            Side::Ask => write!(f, "ask"),
        }
    }
}

/// One market-by-order event.
///
/// Prices are integer ticks; timestamps are nanoseconds since the Unix
/// epoch, as provided by the venue's `ts_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Venue-assigned order identifier.
    pub order_id: u64,
    /// Event timestamp in nanoseconds since the epoch.
    pub timestamp_ns: u64,
    /// Order size in contracts.
    pub size: u32,
    /// Price in integer ticks.
    pub price: i32,
    /// What happened to the order.
    pub action: Action,
    /// Which side of the book.
    pub side: Side,
}

impl Message {
    /// Construct a message. Field order mirrors the CSV layout.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: u64,
        timestamp_ns: u64,
        size: u32,
        price: i32,
        action: Action,
        side: Side,
    ) -> Self {
        Self {
            order_id,
            timestamp_ns,
            size,
            price,
            action,
            side,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_from_code() {
        assert_eq!(Action::from_code(b'A'), Some(Action::Add));
        assert_eq!(Action::from_code(b'C'), Some(Action::Cancel));
        assert_eq!(Action::from_code(b'M'), Some(Action::Modify));
        assert_eq!(Action::from_code(b'T'), Some(Action::Trade));
        assert_eq!(Action::from_code(b'X'), None);
    }

    #[test]
    fn test_side_from_code_and_flip() {
        assert_eq!(Side::from_code(b'B'), Some(Side::Bid));
        assert_eq!(Side::from_code(b'A'), Some(Side::Ask));
        assert_eq!(Side::from_code(b'N'), None);
        assert_eq!(Side::Bid.flip(), Side::Ask);
        assert_eq!(Side::Ask.flip(), Side::Bid);
    }

    #[test]
    fn test_side_key_bit() {
        assert_eq!(Side::Bid.key_bit(), 0);
        assert_eq!(Side::Ask.key_bit(), 1);
    }

    #[test]
    fn test_message_serde_roundtrip() {
        let msg = Message::new(42, 1_700_000_000_000_000_000, 5, 4100, Action::Add, Side::Bid);
        let json = serde_json::to_string(&msg).unwrap_or_default();
        let back: Message = serde_json::from_str(&json).unwrap_or(msg);
        assert_eq!(back, msg);
    }
}
