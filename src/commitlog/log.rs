use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{fmt, io};

/// TxId identifies a record in the log. It is the byte position of the record, so ids are
/// strictly increasing but not contiguous. Two logs that start at the same id and receive
/// the same payloads in the same order assign the same ids.
#[derive(Copy, Clone, Default, PartialOrd, PartialEq, Ord, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(u64);

impl TxId {
    pub const fn new(id: u64) -> Self {
        TxId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn plus(&self, delta: u64) -> TxId {
        TxId(self.0 + delta)
    }

    /// Bytes between `earlier` and this id. Zero if `earlier` is not earlier.
    pub fn distance_from(&self, earlier: TxId) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Lowercase 16 digit hex, used in file names.
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn from_hex(hex: &str) -> Option<TxId> {
        if hex.len() != 16 {
            return None;
        }
        u64::from_str_radix(hex, 16).ok().map(TxId)
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogRecord {
    pub id: TxId,
    /// Millis since epoch when the record was first appended, on whichever node appended it.
    pub timestamp: i64,
    pub payload: Bytes,
}

/// Log is an append only log used as the durable transaction log of a repository.
///
/// Old records may be dropped once the log grows past `max_size()`. `first_id()` is the
/// oldest record still retained.
pub trait Log: Send + 'static {
    /// append() appends a record at `next_id()` and returns the id it was written at.
    fn append(&mut self, timestamp: i64, payload: &[u8]) -> Result<TxId, io::Error>;

    /// Open a cursor positioned at `from`, which must be a record boundary between
    /// `first_id()` and `next_id()` inclusive.
    fn cursor(&self, from: TxId) -> Result<Box<dyn LogCursor>, io::Error>;

    fn sync(&mut self) -> Result<(), io::Error>;

    fn first_id(&self) -> TxId;

    /// next_id returns the id that the next append will use.
    fn next_id(&self) -> TxId;

    /// Discard every record and restart the log at `first_id`.
    fn reset(&mut self, first_id: TxId) -> Result<(), io::Error>;

    fn max_size(&self) -> u64;
}

/// LogCursor reads records in id order. Reaching the tail is not an error: `next()` returns
/// `None` and will return newer records once they are appended.
pub trait LogCursor: Send {
    fn next(&mut self) -> Result<Option<LogRecord>, io::Error>;

    /// Id of the record the next call to `next()` returns.
    fn position(&self) -> TxId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_names() {
        let id = TxId::new(0xabc);
        assert_eq!(id.to_hex(), "0000000000000abc");
        assert_eq!(TxId::from_hex("0000000000000abc"), Some(id));
        assert_eq!(TxId::from_hex("abc"), None);
        assert_eq!(TxId::from_hex("zzzzzzzzzzzzzzzz"), None);
    }
}
