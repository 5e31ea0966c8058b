//! Protocol error types.

use thiserror::Error;

/// Result alias for record encoding and decoding.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while decoding a stored message record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input ended before the record was complete.
    #[error("record too short: needed {needed} bytes, have {available}")]
    RecordTooShort {
        /// Bytes required to continue decoding
        needed: usize,
        /// Bytes remaining in the input
        available: usize,
    },

    /// Unknown message kind tag.
    #[error("unknown message kind: {0}")]
    UnknownKind(u64),

    /// Varint ran past 10 bytes or overflowed u64.
    #[error("malformed varint length prefix")]
    MalformedVarint,

    /// Author or text is not valid UTF-8.
    #[error("invalid utf-8 in {field}")]
    InvalidUtf8 {
        /// Which string field failed
        field: &'static str,
    },

    /// Bytes left over after the text field.
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
}
