//! Durable message store.
//!
//! Each channel keeps its newest text messages in an embedded ordered store so
//! a restarted server can replay them. Join and leave notices are never
//! stored. A per-channel activity timestamp and a `(timestamp, name)` index
//! answer "recently active" queries without scanning every channel.
//!
//! The trait is synchronous. Async callers run it on the blocking pool.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStorage;
pub use error::StorageError;
pub use memory::MemoryStorage;
use pixelchat_proto::Message;

pub use self::redb::RedbStorage;

/// Storage for channel message history and activity.
///
/// Must be Clone (shared by every channel and the directory), Send + Sync and
/// synchronous. Implementations share internal state, so clones see the same
/// data.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Persist `message` in `channel` and record `active_secs` as the
    /// channel's last activity, in one atomic step.
    ///
    /// # Invariants
    ///
    /// - Post: the channel holds at most `keep` messages, oldest evicted first
    /// - Post: the recency index holds exactly one entry for `channel`
    fn append_message(
        &self,
        channel: &str,
        message: &Message,
        active_secs: i64,
        keep: usize,
    ) -> Result<(), StorageError>;

    /// Stored messages of `channel` in id order. Empty if none were stored.
    fn load_messages(&self, channel: &str) -> Result<Vec<Message>, StorageError>;

    /// Last activity timestamp of `channel`, if it ever stored a message.
    fn last_active(&self, channel: &str) -> Result<Option<i64>, StorageError>;

    /// Up to `limit` channels with their last activity, newest first.
    fn recent_channels(&self, limit: usize) -> Result<Vec<(String, i64)>, StorageError>;

    /// Number of channels that have stored at least one message.
    fn channel_count(&self) -> Result<usize, StorageError>;
}

/// Key of a message record: its id, big-endian, so key order is id order.
pub(crate) fn message_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

/// Key of a recency index entry: timestamp (big-endian) followed by the name.
pub(crate) fn sort_key(active_secs: i64, channel: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + channel.len());
    key.extend_from_slice(&active_secs.to_be_bytes());
    key.extend_from_slice(channel.as_bytes());
    key
}
