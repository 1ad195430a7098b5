//! Order book error types.

use std::fmt;

/// Errors that can occur within the book engine.
///
/// Nothing on the message hot path recovers by unwinding: state defects such
/// as a cancel for an unknown order are fixed up in place (see
/// `OrderBook::process_msg`), and the only fallible operations are the ones
/// that grow backing storage.
#[derive(Debug)]
#[non_exhaustive]
pub enum BookError {
    /// The memory arena backing a lookup table could not be mapped.
    ArenaMap {
        /// Requested arena size in bytes.
        requested: usize,
        /// Underlying mmap error message.
        message: String,
    },

    /// An allocation request exceeded the arena's fixed capacity.
    ArenaExhausted {
        /// Bytes requested by the allocation.
        requested: usize,
        /// Bytes already in use.
        used: usize,
        /// Total arena capacity in bytes.
        capacity: usize,
    },

    /// A lookup-table capacity argument was not expressible.
    InvalidCapacity {
        /// The requested capacity.
        requested: usize,
    },
}

impl fmt::Display for BookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookError::ArenaMap { requested, message } => {
                write!(f, "failed to map {requested}-byte arena: {message}")
            }
            BookError::ArenaExhausted {
                requested,
                used,
                capacity,
            } => {
                write!(
                    f,
                    "arena exhausted: requested {requested} bytes with {used}/{capacity} in use"
                )
            }
            BookError::InvalidCapacity { requested } => {
                write!(f, "invalid lookup table capacity: {requested}")
            }
        }
    }
}

impl std::error::Error for BookError {}
