#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use pixelchat_proto::Message;

use super::{Storage, StorageError};

/// In-memory storage implementation for testing and simulation
///
/// Mirrors the redb layout: one ordered map of encoded records per channel,
/// an activity map and a sorted `(timestamp, name)` index. Records are stored
/// encoded so decode failures surface the same way as on disk.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    /// Encoded records per channel, keyed by message id
    buckets: HashMap<String, BTreeMap<u64, Vec<u8>>>,

    /// Channel name -> last activity
    active: HashMap<String, i64>,

    /// Recency index
    sort: BTreeSet<(i64, String)>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in the recency index.
    pub fn index_len(&self) -> usize {
        self.lock().sort.len()
    }

    /// Total number of stored records across all channels.
    pub fn total_message_count(&self) -> usize {
        self.lock().buckets.values().map(BTreeMap::len).sum()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStorageInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemoryStorage {
    fn append_message(
        &self,
        channel: &str,
        message: &Message,
        active_secs: i64,
        keep: usize,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();

        let bucket = inner.buckets.entry(channel.to_string()).or_default();
        bucket.insert(message.id, message.encode());
        while bucket.len() > keep {
            bucket.pop_first();
        }

        if let Some(previous) = inner.active.insert(channel.to_string(), active_secs) {
            inner.sort.remove(&(previous, channel.to_string()));
        }
        inner.sort.insert((active_secs, channel.to_string()));

        Ok(())
    }

    fn load_messages(&self, channel: &str) -> Result<Vec<Message>, StorageError> {
        let inner = self.lock();
        let Some(bucket) = inner.buckets.get(channel) else {
            return Ok(Vec::new());
        };

        bucket.values().map(|record| Message::decode(record).map_err(StorageError::from)).collect()
    }

    fn last_active(&self, channel: &str) -> Result<Option<i64>, StorageError> {
        Ok(self.lock().active.get(channel).copied())
    }

    fn recent_channels(&self, limit: usize) -> Result<Vec<(String, i64)>, StorageError> {
        Ok(self.lock().sort.iter().rev().take(limit).map(|(secs, name)| (name.clone(), *secs)).collect())
    }

    fn channel_count(&self) -> Result<usize, StorageError> {
        Ok(self.lock().active.len())
    }
}
