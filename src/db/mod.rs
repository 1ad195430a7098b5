//! Database sink: reconnecting line-protocol clients and their shared pool.

mod connection;
mod pool;

pub use connection::{Connection, ConnectionState, DbError};
pub use pool::{ConnectionPool, DEFAULT_POOL_SIZE, PooledConnection};
