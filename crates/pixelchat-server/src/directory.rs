//! Process-wide registry of live channels.
//!
//! Channels are loaded on first use and evicted by a periodic sweep once
//! nobody is watching. The directory lock only guards the name map; loading
//! and rendering happen outside it.

#![allow(clippy::disallowed_types, reason = "Critical sections never await")]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use pixelchat_render::FrameRenderer;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    channel::{Channel, ChannelConfig},
    env::Environment,
    storage::{Storage, StorageError},
};

/// Directory tuning.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Interval between sweeps for idle channels
    pub purge_period: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self { purge_period: Duration::from_secs(60) }
    }
}

/// Errors from directory operations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The channel name is empty.
    #[error("invalid channel name")]
    InvalidName,

    /// The channel's history could not be read.
    #[error("loading channel failed: {0}")]
    Storage(#[from] StorageError),
}

/// Name → live channel map shared by every request.
pub struct RoomDirectory<E: Environment, S: Storage> {
    env: E,
    storage: S,
    renderer: Arc<FrameRenderer>,
    channel_config: ChannelConfig,
    channels: Mutex<HashMap<String, Arc<Channel<E, S>>>>,
    total_viewers: AtomicUsize,
}

impl<E: Environment, S: Storage> RoomDirectory<E, S> {
    /// Empty directory whose channels share `renderer` and `storage`.
    pub fn new(env: E, storage: S, renderer: Arc<FrameRenderer>, channel_config: ChannelConfig) -> Self {
        Self {
            env,
            storage,
            renderer,
            channel_config,
            channels: Mutex::new(HashMap::new()),
            total_viewers: AtomicUsize::new(0),
        }
    }

    /// The live channel `name`, loading it from storage if needed.
    ///
    /// When a tokio runtime is available the channel's auto refresh timer is
    /// started. Blocks on storage and rendering for a cold channel.
    ///
    /// # Errors
    ///
    /// - `DirectoryError::InvalidName` for an empty name
    /// - `DirectoryError::Storage` if the history cannot be read
    pub fn open(&self, name: &str) -> Result<Arc<Channel<E, S>>, DirectoryError> {
        if name.is_empty() {
            return Err(DirectoryError::InvalidName);
        }
        if let Some(channel) = self.find(name) {
            return Ok(channel);
        }

        let loaded = Channel::load(
            name,
            self.env.clone(),
            self.storage.clone(),
            Arc::clone(&self.renderer),
            self.channel_config.clone(),
        )?;

        let mut channels = self.lock();
        if let Some(existing) = channels.get(name).filter(|c| !c.is_closed()) {
            let existing = Arc::clone(existing);
            drop(channels);
            loaded.close();
            return Ok(existing);
        }
        channels.insert(name.to_string(), Arc::clone(&loaded));
        drop(channels);

        if tokio::runtime::Handle::try_current().is_ok() {
            loaded.spawn_auto_refresh();
        }
        Ok(loaded)
    }

    /// The live channel `name`, without loading.
    pub fn find(&self, name: &str) -> Option<Arc<Channel<E, S>>> {
        self.lock().get(name).filter(|c| !c.is_closed()).cloned()
    }

    /// Close and drop every channel without viewers.
    ///
    /// Returns how many channels were evicted. Also recomputes the total
    /// viewer count.
    pub fn purge(&self) -> usize {
        let mut channels = self.lock();
        let before = channels.len();

        channels.retain(|name, channel| {
            if channel.close_if_idle() {
                info!(channel = %name, "channel purged");
                false
            } else {
                true
            }
        });

        let viewers = channels.values().map(|c| c.viewer_count()).sum();
        self.total_viewers.store(viewers, Ordering::Relaxed);
        before - channels.len()
    }

    /// Sweep idle channels every `config.purge_period`.
    ///
    /// The task ends when the directory is dropped.
    pub fn spawn_purge_task(self: &Arc<Self>, config: &DirectoryConfig) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let mut ticker = tokio::time::interval(config.purge_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tokio::spawn(async move {
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(directory) = weak.upgrade() else {
                    break;
                };
                if tokio::task::spawn_blocking(move || directory.purge()).await.is_err() {
                    warn!("purge task failed");
                }
            }
        })
    }

    /// Number of live channels.
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Viewers across all channels as of the last purge.
    pub fn total_viewers(&self) -> usize {
        self.total_viewers.load(Ordering::Relaxed)
    }

    /// Channels that have ever stored a message.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn channel_count(&self) -> Result<usize, StorageError> {
        self.storage.channel_count()
    }

    /// Up to `limit` recently active channels, newest first.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn recent_channels(&self, limit: usize) -> Result<Vec<(String, i64)>, StorageError> {
        self.storage.recent_channels(limit)
    }

    /// Clock and RNG shared with the channels.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Renderer shared by every channel.
    pub fn renderer(&self) -> &Arc<FrameRenderer> {
        &self.renderer
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Channel<E, S>>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
