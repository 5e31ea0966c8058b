//! Chat message record.

use crate::{
    errors::{ProtocolError, Result},
    varint::{put_uvarint, read_uvarint},
};

/// Seconds subtracted from the activity timestamp before it is packed into
/// the high bits of a message id.
pub const ID_EPOCH_OFFSET: i64 = 1_600_000_000;

/// Fixed header: id, kind and unix time, 8 bytes each.
const HEADER_SIZE: usize = 24;

/// What a message represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// User-authored text
    Text,
    /// A viewer arrived
    Join,
    /// A viewer left
    Leave,
}

impl MessageKind {
    /// Wire tag stored in the record header.
    pub fn to_wire(self) -> u64 {
        match self {
            Self::Text => 1,
            Self::Join => 2,
            Self::Leave => 3,
        }
    }

    /// Parse a wire tag.
    pub fn from_wire(tag: u64) -> Result<Self> {
        match tag {
            1 => Ok(Self::Text),
            2 => Ok(Self::Join),
            3 => Ok(Self::Leave),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }

    /// Join and Leave are presence notices, kept in memory only.
    pub fn is_presence(self) -> bool {
        matches!(self, Self::Join | Self::Leave)
    }
}

/// One entry of a channel's message log.
///
/// `id` and `unix_time` are assigned by the channel on append; a message built
/// by a caller carries zeroes until then.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Channel-unique, strictly increasing id
    pub id: u64,
    /// Author identity
    pub from: String,
    /// Seconds since the Unix epoch
    pub unix_time: i64,
    /// Message kind
    pub kind: MessageKind,
    /// UTF-8 body (empty for presence notices)
    pub text: String,
}

impl Message {
    /// A text message awaiting id assignment.
    pub fn text(from: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: 0, from: from.into(), unix_time: 0, kind: MessageKind::Text, text: text.into() }
    }

    /// A presence notice awaiting id assignment.
    pub fn presence(from: impl Into<String>, kind: MessageKind) -> Self {
        Self { id: 0, from: from.into(), unix_time: 0, kind, text: String::new() }
    }

    /// Encode into the storage record layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + 4 + self.from.len() + self.text.len());
        out.extend_from_slice(&self.id.to_be_bytes());
        out.extend_from_slice(&self.kind.to_wire().to_be_bytes());
        out.extend_from_slice(&self.unix_time.to_be_bytes());
        put_uvarint(&mut out, self.from.len() as u64);
        out.extend_from_slice(self.from.as_bytes());
        put_uvarint(&mut out, self.text.len() as u64);
        out.extend_from_slice(self.text.as_bytes());
        out
    }

    /// Decode a storage record.
    ///
    /// # Errors
    ///
    /// Any truncation, unknown kind, oversized length prefix, invalid UTF-8 or
    /// trailing garbage is reported; decoding never panics.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < HEADER_SIZE {
            return Err(ProtocolError::RecordTooShort { needed: HEADER_SIZE, available: src.len() });
        }

        let id = read_u64(&src[0..8]);
        let kind = MessageKind::from_wire(read_u64(&src[8..16]))?;
        let unix_time = read_u64(&src[16..24]) as i64;

        let mut rest = &src[HEADER_SIZE..];
        let from = take_string(&mut rest, "from")?;
        let text = take_string(&mut rest, "text")?;

        if !rest.is_empty() {
            return Err(ProtocolError::TrailingBytes(rest.len()));
        }

        Ok(Self { id, from, unix_time, kind, text })
    }
}

/// Build a message id.
///
/// Layout: `(active - ID_EPOCH_OFFSET) << 31 | (name_hash & 0x7FFF) << 16 |
/// (counter & 0xFFFF)`. Ids from the same channel sort by activity second
/// first, then by counter.
pub fn message_id(active_secs: i64, name_hash: u32, counter: u64) -> u64 {
    let seconds = active_secs.saturating_sub(ID_EPOCH_OFFSET).max(0) as u64;
    seconds << 31 | u64::from(name_hash & 0x7FFF) << 16 | (counter & 0xFFFF)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

fn take_string(rest: &mut &[u8], field: &'static str) -> Result<String> {
    let (len, used) = read_uvarint(rest)?;
    let body = &rest[used..];

    let len = usize::try_from(len).map_err(|_| ProtocolError::MalformedVarint)?;
    if body.len() < len {
        return Err(ProtocolError::RecordTooShort { needed: len, available: body.len() });
    }

    let value = std::str::from_utf8(&body[..len])
        .map_err(|_| ProtocolError::InvalidUtf8 { field })?
        .to_string();
    *rest = &body[len..];
    Ok(value)
}
