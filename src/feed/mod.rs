//! Feed boundary: the MBO event model and the CSV parser that produces the
//! immutable message vectors consumed by the replay drivers.

mod message;
mod parser;

pub use message::{Action, Message, Side};
pub use parser::{FeedError, parse_bytes, parse_file};
