//! The order book engine: pools, lookups, sides and the book itself.

mod arena;
mod book;
mod error;
mod limit;
mod lookup;
mod order;
mod pool;
mod side;

#[cfg(test)]
mod tests;

pub use arena::{Arena, CACHE_LINE};
pub use book::{AnalyticsFlags, MID_PRICE_BUFFER, OrderBook};
pub use error::BookError;
pub use limit::{LevelOrders, Limit};
pub use lookup::OpenAddressTable;
pub use order::{LimitRef, Order, OrderRef};
pub use pool::{LimitPool, OrderPool};
pub use side::BookSide;
