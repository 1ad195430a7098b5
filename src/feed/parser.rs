//! CSV feed parser.
//!
//! Memory-maps an MBO CSV file and decodes it into an immutable, time-ordered
//! `Vec<Message>`. The expected layout is a single header line followed by
//! records of the form:
//!
//! ```text
//! ts_event,action,side,price,size,order_id
//! ```
//!
//! Additional trailing columns are ignored. Malformed records abort the parse
//! with a typed error; the replay engine never sees partial input.

use super::message::{Action, Message, Side};
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors produced while loading a feed file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FeedError {
    /// The file could not be opened or mapped.
    #[error("failed to read feed file {path}: {message}")]
    Io {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying I/O error message.
        message: String,
    },

    /// The file is empty or has no header line.
    #[error("feed file {path} is missing its header line")]
    MissingHeader {
        /// Path of the offending file.
        path: PathBuf,
    },

    /// A record could not be decoded.
    #[error("malformed record at line {line}: {reason}")]
    Malformed {
        /// 1-based line number within the file.
        line: usize,
        /// What went wrong.
        reason: String,
    },

    /// Timestamps went backwards, violating the replay ordering contract.
    #[error("out-of-order timestamp at line {line}: {timestamp_ns} < {previous_ns}")]
    OutOfOrder {
        /// 1-based line number within the file.
        line: usize,
        /// The offending timestamp.
        timestamp_ns: u64,
        /// The preceding timestamp.
        previous_ns: u64,
    },
}

/// Parse a feed file into a message vector.
///
/// The returned vector is strictly non-decreasing in `timestamp_ns`; a
/// violation in the input is reported as [`FeedError::OutOfOrder`] rather
/// than silently re-sorted.
///
/// # Errors
///
/// Returns [`FeedError`] on I/O failure, a missing header, or any malformed
/// record.
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<Message>, FeedError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| FeedError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    // SAFETY: Read-only mapping of a file we just opened. Feed files are
    // immutable once written; nothing truncates them while mapped.
    let mmap = unsafe {
        Mmap::map(&file).map_err(|e| FeedError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?
    };

    let messages = parse_bytes(&mmap, path)?;
    debug!(
        path = %path.display(),
        messages = messages.len(),
        "parsed feed file"
    );
    Ok(messages)
}

/// Parse an in-memory feed buffer. Exposed for tests and synthetic feeds.
///
/// # Errors
///
/// Returns [`FeedError`] on a missing header or any malformed record.
pub fn parse_bytes(data: &[u8], path: &Path) -> Result<Vec<Message>, FeedError> {
    if data.is_empty() {
        return Err(FeedError::MissingHeader {
            path: path.to_path_buf(),
        });
    }

    let mut lines = data.split(|&b| b == b'\n');
    // Header line carries column names and is never decoded.
    let _header = lines.next();

    let mut messages = Vec::with_capacity(estimate_records(data.len()));
    let mut previous_ns = 0u64;

    for (idx, line) in lines.enumerate() {
        // 1-based, plus the header we already consumed.
        let line_no = idx + 2;
        let line = match line.last() {
            Some(b'\r') => &line[..line.len() - 1],
            _ => line,
        };
        if line.is_empty() {
            continue;
        }

        let msg = parse_record(line, line_no)?;
        if msg.timestamp_ns < previous_ns {
            return Err(FeedError::OutOfOrder {
                line: line_no,
                timestamp_ns: msg.timestamp_ns,
                previous_ns,
            });
        }
        previous_ns = msg.timestamp_ns;
        messages.push(msg);
    }

    Ok(messages)
}

/// Decode one CSV record: `ts_event,action,side,price,size,order_id[,...]`.
fn parse_record(line: &[u8], line_no: usize) -> Result<Message, FeedError> {
    let mut fields = line.split(|&b| b == b',');

    let ts_event: u64 = parse_int(fields.next(), line_no, "ts_event")?;
    let action_field = required(fields.next(), line_no, "action")?;
    let side_field = required(fields.next(), line_no, "side")?;
    let price: i64 = parse_int(fields.next(), line_no, "price")?;
    let size: u64 = parse_int(fields.next(), line_no, "size")?;
    let order_id: u64 = parse_int(fields.next(), line_no, "order_id")?;

    let action = action_field
        .first()
        .copied()
        .and_then(Action::from_code)
        .ok_or_else(|| FeedError::Malformed {
            line: line_no,
            reason: format!(
                "unknown action {:?}",
                String::from_utf8_lossy(action_field)
            ),
        })?;
    let side = side_field
        .first()
        .copied()
        .and_then(Side::from_code)
        .ok_or_else(|| FeedError::Malformed {
            line: line_no,
            reason: format!("unknown side {:?}", String::from_utf8_lossy(side_field)),
        })?;

    let price = i32::try_from(price).map_err(|_| FeedError::Malformed {
        line: line_no,
        reason: format!("price {price} does not fit in 32 bits"),
    })?;
    let size = u32::try_from(size).map_err(|_| FeedError::Malformed {
        line: line_no,
        reason: format!("size {size} does not fit in 32 bits"),
    })?;

    Ok(Message::new(order_id, ts_event, size, price, action, side))
}

fn required<'a>(
    field: Option<&'a [u8]>,
    line_no: usize,
    name: &str,
) -> Result<&'a [u8], FeedError> {
    match field {
        Some(f) if !f.is_empty() => Ok(f),
        _ => Err(FeedError::Malformed {
            line: line_no,
            reason: format!("missing {name} column"),
        }),
    }
}

fn parse_int<T>(field: Option<&[u8]>, line_no: usize, name: &str) -> Result<T, FeedError>
where
    T: std::str::FromStr,
{
    let raw = required(field, line_no, name)?;
    let text = std::str::from_utf8(raw).map_err(|_| FeedError::Malformed {
        line: line_no,
        reason: format!("{name} is not valid UTF-8"),
    })?;
    text.trim().parse().map_err(|_| FeedError::Malformed {
        line: line_no,
        reason: format!("{name} is not a valid integer: {text:?}"),
    })
}

/// Rough record-count estimate used to pre-size the message vector.
fn estimate_records(bytes: usize) -> usize {
    // Typical MBO records run ~50 bytes per line.
    bytes / 50
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "ts_event,action,side,price,size,order_id\n";

    fn parse(body: &str) -> Result<Vec<Message>, FeedError> {
        let data = format!("{HEADER}{body}");
        parse_bytes(data.as_bytes(), Path::new("test.csv"))
    }

    #[test]
    fn test_parse_single_record() {
        let msgs = parse("1000,A,B,4100,5,77\n").unwrap_or_default();
        assert_eq!(msgs.len(), 1);
        let m = msgs[0];
        assert_eq!(m.timestamp_ns, 1000);
        assert_eq!(m.action, Action::Add);
        assert_eq!(m.side, Side::Bid);
        assert_eq!(m.price, 4100);
        assert_eq!(m.size, 5);
        assert_eq!(m.order_id, 77);
    }

    #[test]
    fn test_parse_ignores_extra_columns() {
        let msgs = parse("1000,A,A,4101,3,78,extra,columns\n").unwrap_or_default();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].side, Side::Ask);
    }

    #[test]
    fn test_parse_skips_blank_lines_and_crlf() {
        let msgs = parse("1000,A,B,4100,5,77\r\n\n2000,C,B,4100,5,77\n").unwrap_or_default();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].action, Action::Cancel);
    }

    #[test]
    fn test_parse_rejects_bad_action() {
        let err = parse("1000,Z,B,4100,5,77\n");
        assert!(matches!(err, Err(FeedError::Malformed { line: 2, .. })));
    }

    #[test]
    fn test_parse_rejects_bad_integer() {
        let err = parse("1000,A,B,notaprice,5,77\n");
        assert!(matches!(err, Err(FeedError::Malformed { .. })));
    }

    #[test]
    fn test_parse_rejects_missing_columns() {
        let err = parse("1000,A,B\n");
        assert!(matches!(err, Err(FeedError::Malformed { .. })));
    }

    #[test]
    fn test_parse_rejects_out_of_order_timestamps() {
        let err = parse("2000,A,B,4100,5,1\n1000,A,B,4100,5,2\n");
        assert!(matches!(err, Err(FeedError::OutOfOrder { line: 3, .. })));
    }

    #[test]
    fn test_parse_negative_price() {
        // Spread instruments can legitimately trade at negative ticks.
        let msgs = parse("1000,A,B,-25,5,77\n").unwrap_or_default();
        assert_eq!(msgs[0].price, -25);
    }
}
