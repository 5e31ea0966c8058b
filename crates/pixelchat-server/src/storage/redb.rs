//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. A
//! message write, its trim and the activity index update commit together.

use std::{path::Path, sync::Arc};

use pixelchat_proto::Message;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, TableError};

use super::{Storage, StorageError, message_key, sort_key};

/// Table: channel
/// Key: channel name (UTF-8)
/// Value: last activity, seconds since epoch as big-endian i64 [8 bytes]
const CHANNELS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("channel");

/// Table: channelsort
/// Key: last activity big-endian [8 bytes] followed by channel name
/// Value: empty
const CHANNEL_SORT: TableDefinition<&[u8], &[u8]> = TableDefinition::new("channelsort");

/// Prefix of per-channel message tables.
/// Key: message id big-endian [8 bytes]
/// Value: encoded `Message` record
const BUCKET_PREFIX: &str = "channel-";

fn io(e: impl std::fmt::Display) -> StorageError {
    StorageError::Io(e.to_string())
}

fn bucket_name(channel: &str) -> String {
    format!("{BUCKET_PREFIX}{channel}")
}

fn decode_secs(bytes: &[u8]) -> Result<i64, StorageError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::Serialization(format!("activity value is {} bytes", bytes.len())))?;
    Ok(i64::from_be_bytes(raw))
}

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates the activity tables if they don't exist. Message tables are
    /// created on first write to each channel.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(CHANNELS).map_err(io)?;
            let _ = txn.open_table(CHANNEL_SORT).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl Storage for RedbStorage {
    fn append_message(
        &self,
        channel: &str,
        message: &Message,
        active_secs: i64,
        keep: usize,
    ) -> Result<(), StorageError> {
        let name = bucket_name(channel);
        let bucket_def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(&name);
        let record = message.encode();

        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut bucket = txn.open_table(bucket_def).map_err(io)?;
            bucket.insert(message_key(message.id).as_slice(), record.as_slice()).map_err(io)?;
            while bucket.len().map_err(io)? > keep as u64 {
                bucket.pop_first().map_err(io)?;
            }

            let mut channels = txn.open_table(CHANNELS).map_err(io)?;
            let previous = match channels.get(channel.as_bytes()).map_err(io)? {
                Some(value) => Some(decode_secs(value.value())?),
                None => None,
            };

            let mut sort = txn.open_table(CHANNEL_SORT).map_err(io)?;
            if let Some(previous) = previous {
                sort.remove(sort_key(previous, channel).as_slice()).map_err(io)?;
            }
            sort.insert(sort_key(active_secs, channel).as_slice(), b"".as_slice()).map_err(io)?;

            channels.insert(channel.as_bytes(), active_secs.to_be_bytes().as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(())
    }

    fn load_messages(&self, channel: &str) -> Result<Vec<Message>, StorageError> {
        let name = bucket_name(channel);
        let bucket_def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(&name);

        let txn = self.db.begin_read().map_err(io)?;
        let bucket = match txn.open_table(bucket_def) {
            Ok(bucket) => bucket,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(io(e)),
        };

        let mut messages = Vec::new();
        for entry in bucket.iter().map_err(io)? {
            let (_, value) = entry.map_err(io)?;
            messages.push(Message::decode(value.value())?);
        }

        Ok(messages)
    }

    fn last_active(&self, channel: &str) -> Result<Option<i64>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let channels = txn.open_table(CHANNELS).map_err(io)?;

        match channels.get(channel.as_bytes()).map_err(io)? {
            Some(value) => Ok(Some(decode_secs(value.value())?)),
            None => Ok(None),
        }
    }

    fn recent_channels(&self, limit: usize) -> Result<Vec<(String, i64)>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let sort = txn.open_table(CHANNEL_SORT).map_err(io)?;

        let mut recent = Vec::with_capacity(limit.min(64));
        for entry in sort.iter().map_err(io)?.rev() {
            if recent.len() >= limit {
                break;
            }

            let (key, _) = entry.map_err(io)?;
            let key = key.value();
            if key.len() < 8 {
                return Err(StorageError::Serialization("short recency key".to_string()));
            }
            let (secs, name) = key.split_at(8);
            let name = std::str::from_utf8(name)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            recent.push((name.to_string(), decode_secs(secs)?));
        }

        Ok(recent)
    }

    fn channel_count(&self) -> Result<usize, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let channels = txn.open_table(CHANNELS).map_err(io)?;

        Ok(channels.len().map_err(io)? as usize)
    }
}
