//! The channel state machine.
//!
//! A channel owns one bounded message log, the last encoded frame for each
//! viewport class, and the registry of connected viewers. Every mutation
//! takes the channel lock for a short critical section; rendering, storage
//! writes and network writes all happen outside it.
//!
//! # Refresh
//!
//! A refresh snapshots the log under the lock, renders every viewport class
//! without it, then re-takes the lock to publish: cache the frames, count the
//! traffic, and offer each frame to the matching viewers' mailboxes. A
//! refresh whose snapshot is older than one already published is discarded,
//! so concurrent refreshes never roll viewers back to an older state.
//!
//! # Join policy
//!
//! One session per identity. A rejoin from the same address displaces the
//! old session (it receives a notice frame and exits without a leave
//! message). A join from a different address is rejected with an error frame
//! and changes nothing.

#![allow(clippy::disallowed_types, reason = "Critical sections never await")]

use std::{
    collections::VecDeque,
    net::IpAddr,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use pixelchat_proto::{Message, MessageKind, message_id};
use pixelchat_render::{EncodedFrame, FrameInput, FrameRenderer, ViewportClass};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    env::Environment,
    mailbox::{Delivery, Mailbox},
    registry::{ViewerEntry, ViewerRegistry},
    storage::{Storage, StorageError},
};

/// Multipart boundary separating streamed frames.
pub const BOUNDARY: &str = "frame";

/// Text of the frame sent to a displaced session.
pub const DISPLACED_NOTICE: &str = "reopened in another window";

/// Channel tuning.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Messages kept in memory and on disk
    pub history_limit: usize,
    /// Frames a viewer mailbox holds
    pub mailbox_capacity: usize,
    /// Idle time after which an occupied channel re-renders on its own
    pub auto_refresh_period: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { history_limit: 50, mailbox_capacity: 10, auto_refresh_period: Duration::from_secs(10) }
    }
}

/// Errors from channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel was purged from the directory.
    #[error("channel is closed")]
    Closed,

    /// The identity is already connected from another address.
    ///
    /// `frame` is a ready-to-send JPEG explaining the rejection.
    #[error("identity already connected from another address")]
    JoinRejected {
        /// Error frame for the rejected viewer
        frame: EncodedFrame,
    },

    /// The message is in the log but could not be persisted.
    #[error("persistence failed: {0}")]
    Persistence(#[from] StorageError),
}

/// How a viewer's delivery loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Writing to the viewer failed.
    Disconnected,
    /// The identity reconnected from the same address.
    Displaced,
    /// The session or channel was closed.
    Closed,
}

struct ChannelState {
    log: VecDeque<Message>,
    last_id: u64,
    counter: u64,
    active_secs: i64,
    frames: [Option<EncodedFrame>; 2],
    viewers: ViewerRegistry,
    traffic_bytes: u64,
    /// Encoded size of the last frame, per viewport class
    last_frame_bytes: [usize; 2],
    last_render_ms: u64,
    /// Badged links of the last frame, per viewport class
    links: [Vec<String>; 2],
    last_refresh: Instant,
    next_session: u64,
    /// Bumped by every change that alters a frame
    version: u64,
    /// Version of the newest published frames
    published_version: u64,
}

/// A live chat channel.
pub struct Channel<E: Environment, S: Storage> {
    name: String,
    name_hash: u32,
    env: E,
    storage: S,
    renderer: Arc<FrameRenderer>,
    config: ChannelConfig,
    state: Mutex<ChannelState>,
    closed: AtomicBool,
    /// Pre-rendered displacement notices, one per viewport class
    notices: [EncodedFrame; 2],
}

impl<E: Environment, S: Storage> Channel<E, S> {
    /// Load `name` from storage and render its first frames.
    ///
    /// Blocks on storage and rendering; async callers should use the blocking
    /// pool.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the history cannot be read.
    pub fn load(
        name: impl Into<String>,
        env: E,
        storage: S,
        renderer: Arc<FrameRenderer>,
        config: ChannelConfig,
    ) -> Result<Arc<Self>, StorageError> {
        let name = name.into();
        let history = storage.load_messages(&name)?;
        let active_secs = storage.last_active(&name)?.unwrap_or_else(|| env.wall_clock_secs());

        let skip = history.len().saturating_sub(config.history_limit);
        let log: VecDeque<Message> = history.into_iter().skip(skip).collect();
        let last_id = log.back().map_or(0, |m| m.id);
        let notices = ViewportClass::ALL.map(|class| renderer.error_frame(class, DISPLACED_NOTICE));

        info!(channel = %name, messages = log.len(), "channel loaded");

        let channel = Arc::new(Self {
            name_hash: name_hash(&name),
            state: Mutex::new(ChannelState {
                log,
                last_id,
                counter: env.random_u64(),
                active_secs,
                frames: [None, None],
                viewers: ViewerRegistry::new(),
                traffic_bytes: 0,
                last_frame_bytes: [0; 2],
                last_render_ms: 1,
                links: [Vec::new(), Vec::new()],
                last_refresh: Instant::now(),
                next_session: 0,
                version: 0,
                published_version: 0,
            }),
            name,
            env,
            storage,
            renderer,
            config,
            closed: AtomicBool::new(false),
            notices,
        });
        channel.refresh();

        Ok(channel)
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Assign an id and timestamp to `message` and append it to the log.
    ///
    /// Text messages are then persisted. The in-memory append stands even if
    /// persistence fails. Does not refresh; callers decide when to render.
    ///
    /// # Errors
    ///
    /// - `ChannelError::Closed` if the channel was purged
    /// - `ChannelError::Persistence` if the store rejected the write
    pub fn append(&self, mut message: Message) -> Result<Message, ChannelError> {
        let now = self.env.wall_clock_secs();
        let keep = self.config.history_limit;

        {
            let mut state = self.lock();
            if self.is_closed() {
                return Err(ChannelError::Closed);
            }

            state.counter = state.counter.wrapping_add(1);
            let id = message_id(now, self.name_hash, state.counter).max(state.last_id.saturating_add(1));
            message.id = id;
            message.unix_time = now;

            state.last_id = id;
            state.active_secs = now;
            state.log.push_back(message.clone());
            while state.log.len() > keep {
                state.log.pop_front();
            }
            state.version += 1;
        }

        if message.kind == MessageKind::Text {
            if let Err(e) = self.storage.append_message(&self.name, &message, now, keep) {
                warn!(channel = %self.name, id = message.id, error = %e, "persisting message failed");
                return Err(ChannelError::Persistence(e));
            }
        }

        Ok(message)
    }

    /// Re-render every viewport class and push the frames to viewers.
    ///
    /// Returns `false` if nothing was published: every render failed, or a
    /// newer refresh already published.
    pub fn refresh(&self) -> bool {
        let (messages, version, viewers, traffic_bytes, last_frame_bytes, last_render_ms) = {
            let mut state = self.lock();
            state.last_refresh = Instant::now();
            (
                state.log.iter().cloned().collect::<Vec<_>>(),
                state.version,
                state.viewers.count(),
                state.traffic_bytes,
                state.last_frame_bytes,
                state.last_render_ms,
            )
        };

        let input = FrameInput {
            messages: &messages,
            viewers,
            traffic_bytes,
            last_frame_bytes: 0,
            last_render_ms,
            now_secs: self.env.wall_clock_secs(),
        };
        let started = std::time::Instant::now();
        let rendered = ViewportClass::ALL.map(|class| {
            let input = FrameInput { last_frame_bytes: last_frame_bytes[class.index()], ..input };
            self.renderer.render_encoded(&input, class)
        });
        let render_ms = (started.elapsed().as_millis() as u64).max(1);

        let mut guard = self.lock();
        let state = &mut *guard;
        if version < state.published_version {
            debug!(channel = %self.name, version, published = state.published_version, "stale refresh dropped");
            return false;
        }

        let mut published = false;
        for (class, frame) in ViewportClass::ALL.into_iter().zip(rendered) {
            let Some((frame, links)) = frame else {
                continue;
            };

            let offered =
                state.viewers.iter().filter(|v| v.class == class).filter(|v| v.mailbox.offer(frame.clone())).count();
            state.traffic_bytes += frame.len() as u64 * offered as u64;
            state.last_frame_bytes[class.index()] = frame.len();
            state.links[class.index()] = links;
            state.frames[class.index()] = Some(frame);
            published = true;
        }

        if published {
            state.published_version = version;
            state.last_render_ms = render_ms;
        }
        published
    }

    /// Connect a viewer.
    ///
    /// On success the viewer is registered, already holds the last cached
    /// frame for its class, and a fresh frame has been pushed. Blocks on
    /// rendering.
    ///
    /// # Errors
    ///
    /// - `ChannelError::JoinRejected` if `identity` is connected from another
    ///   address
    /// - `ChannelError::Closed` if the channel was purged
    pub fn join(
        self: &Arc<Self>,
        identity: &str,
        class: ViewportClass,
        address: IpAddr,
    ) -> Result<ViewerSession<E, S>, ChannelError> {
        let mut state = self.lock();
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let (conflict, same_address) = {
            let existing = state.viewers.sessions_for_identity(identity);
            let conflict = existing.iter().find(|e| e.address != address).map(|e| e.address);
            (conflict, existing.iter().map(|e| e.session_id).collect::<Vec<_>>())
        };

        if let Some(existing) = conflict {
            drop(state);
            info!(channel = %self.name, identity, %existing, rejected = %address, "join rejected: identity in use");
            let frame = self.renderer.error_frame(class, &format!("'{identity}' already exists in this channel"));
            return Err(ChannelError::JoinRejected { frame });
        }

        let mut displaced = Vec::with_capacity(same_address.len());
        for session_id in same_address {
            if let Some(entry) = state.viewers.unregister(session_id) {
                entry.mailbox.displace(self.notices[entry.class.index()].clone());
                displaced.push(entry);
            }
        }

        state.next_session += 1;
        let session_id = state.next_session;
        let mailbox = Mailbox::new(self.config.mailbox_capacity);
        if let Some(frame) = &state.frames[class.index()] {
            mailbox.offer(frame.clone());
        }

        let joined_at = std::time::Instant::now();
        state.viewers.register(ViewerEntry {
            session_id,
            identity: identity.to_string(),
            class,
            address,
            joined_at,
            mailbox: mailbox.clone(),
        });
        state.version += 1;
        drop(state);

        for entry in &displaced {
            info!(
                channel = %self.name,
                identity,
                session = entry.session_id,
                lifetime_secs = entry.joined_at.elapsed().as_secs(),
                "switched window"
            );
        }

        if displaced.is_empty() {
            if let Err(e) = self.append(Message::presence(identity, MessageKind::Join)) {
                debug!(channel = %self.name, identity, error = %e, "join notice not recorded");
            }
        }
        self.refresh();

        Ok(ViewerSession {
            channel: Arc::clone(self),
            session_id,
            identity: identity.to_string(),
            class,
            mailbox,
            joined_at,
        })
    }

    /// Disconnect a viewer, announce its departure and refresh.
    ///
    /// A session that was already displaced or removed is ignored.
    pub fn leave(&self, session_id: u64) {
        let removed = {
            let mut state = self.lock();
            let removed = state.viewers.unregister(session_id);
            if removed.is_some() {
                state.version += 1;
            }
            removed
        };
        let Some(entry) = removed else {
            return;
        };
        entry.mailbox.close();

        if let Err(e) = self.append(Message::presence(entry.identity.as_str(), MessageKind::Leave)) {
            debug!(channel = %self.name, identity = %entry.identity, error = %e, "leave notice not recorded");
        }
        self.refresh();
    }

    /// Close the channel if nobody is watching.
    ///
    /// Returns `true` if the channel is now closed. Checked under the channel
    /// lock so a concurrent join either lands first or sees the closure.
    pub fn close_if_idle(&self) -> bool {
        let state = self.lock();
        if !state.viewers.is_empty() {
            return false;
        }
        self.closed.store(true, Ordering::Release);
        true
    }

    /// Close the channel and end every viewer's stream.
    pub fn close(&self) {
        let state = self.lock();
        self.closed.store(true, Ordering::Release);
        for viewer in state.viewers.iter() {
            viewer.mailbox.close();
        }
    }

    /// True once closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Connected viewers.
    pub fn viewer_count(&self) -> usize {
        self.lock().viewers.count()
    }

    /// Snapshot of the message log, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.lock().log.iter().cloned().collect()
    }

    /// URL behind link badge `index` of the latest frame for `class`.
    ///
    /// Badges are numbered per class: a narrow frame may truncate a message
    /// the wide frame shows in full.
    pub fn link(&self, class: ViewportClass, index: usize) -> Option<String> {
        self.lock().links[class.index()].get(index).cloned()
    }

    /// Every link of the latest frame for `class`, in badge order.
    pub fn links(&self, class: ViewportClass) -> Vec<String> {
        self.lock().links[class.index()].clone()
    }

    /// Last encoded frame for `class`.
    pub fn last_frame(&self, class: ViewportClass) -> Option<EncodedFrame> {
        self.lock().frames[class.index()].clone()
    }

    /// Encoded size of the last frame for `class`, as shown in its status bar.
    pub fn last_frame_bytes(&self, class: ViewportClass) -> usize {
        self.lock().last_frame_bytes[class.index()]
    }

    /// Bytes offered to viewer mailboxes so far.
    pub fn traffic_bytes(&self) -> u64 {
        self.lock().traffic_bytes
    }

    /// Timestamp of the last appended message.
    pub fn active_secs(&self) -> i64 {
        self.lock().active_secs
    }

    /// Re-render on a timer while viewers are connected.
    ///
    /// The timer restarts after every refresh, so it only fires after a full
    /// quiet period. The task ends when the channel is closed or dropped.
    pub fn spawn_auto_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = self.config.auto_refresh_period;
        let mut deadline = Instant::now() + period;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep_until(deadline).await;

                let Some(channel) = weak.upgrade() else {
                    break;
                };
                if channel.is_closed() {
                    break;
                }

                let (last_refresh, idle) = {
                    let state = channel.lock();
                    (state.last_refresh, state.viewers.is_empty())
                };
                if last_refresh + period > Instant::now() {
                    deadline = last_refresh + period;
                    continue;
                }

                if !idle {
                    let name = channel.name.clone();
                    if tokio::task::spawn_blocking(move || channel.refresh()).await.is_err() {
                        warn!(channel = %name, "auto refresh task failed");
                    }
                }
                deadline = Instant::now() + period;
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A joined viewer, handed to the connection that streams its frames.
pub struct ViewerSession<E: Environment, S: Storage> {
    channel: Arc<Channel<E, S>>,
    session_id: u64,
    identity: String,
    class: ViewportClass,
    mailbox: Mailbox,
    joined_at: std::time::Instant,
}

impl<E: Environment, S: Storage> ViewerSession<E, S> {
    /// Channel-unique session id.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Identity the session joined as.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Viewport class frames are rendered for.
    pub fn class(&self) -> ViewportClass {
        self.class
    }

    /// Next queued delivery, without waiting.
    pub fn try_next(&self) -> Option<Delivery> {
        self.mailbox.try_recv()
    }

    /// Stream frames into `sink` until the viewer goes away.
    ///
    /// Each frame is written as one multipart part and flushed. The loop ends
    /// on a write failure, a displacement notice (written before exiting) or
    /// closure. Unless displaced, the session then leaves the channel.
    pub async fn deliver<W: AsyncWrite + Unpin>(self, sink: &mut W) -> DeliveryOutcome {
        let outcome = loop {
            match self.mailbox.recv().await {
                Delivery::Frame(frame) => {
                    if let Err(e) = write_part(sink, &frame).await {
                        debug!(channel = %self.channel.name, session = self.session_id, error = %e, "viewer write failed");
                        break DeliveryOutcome::Disconnected;
                    }
                },
                Delivery::Displaced(notice) => {
                    let _ = write_part(sink, &notice).await;
                    break DeliveryOutcome::Displaced;
                },
                Delivery::Closed => break DeliveryOutcome::Closed,
            }
        };

        debug!(
            channel = %self.channel.name,
            session = self.session_id,
            ?outcome,
            lifetime_secs = self.joined_at.elapsed().as_secs(),
            "viewer stream ended"
        );

        if outcome != DeliveryOutcome::Displaced {
            let channel = Arc::clone(&self.channel);
            let session_id = self.session_id;
            if tokio::task::spawn_blocking(move || channel.leave(session_id)).await.is_err() {
                warn!(channel = %self.channel.name, session = session_id, "leave task failed");
            }
        }

        outcome
    }
}

/// Write one multipart part carrying `frame`. Empty frames are skipped.
async fn write_part<W: AsyncWrite + Unpin>(sink: &mut W, frame: &EncodedFrame) -> std::io::Result<()> {
    if frame.is_empty() {
        return Ok(());
    }

    let header = format!("\r\n--{BOUNDARY}\r\nContent-Type: {}\r\n\r\n", frame.content_type);
    sink.write_all(header.as_bytes()).await?;
    sink.write_all(&frame.data).await?;
    sink.flush().await
}

/// First four bytes of SHA-256(name), big-endian.
fn name_hash(name: &str) -> u32 {
    let digest = Sha256::digest(name.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn name_hash_is_stable() {
        assert_eq!(name_hash("lobby"), name_hash("lobby"));
        assert_ne!(name_hash("lobby"), name_hash("lobby2"));
    }

    #[tokio::test]
    async fn write_part_frames_with_boundary() {
        let mut sink = Vec::new();
        let frame = EncodedFrame::jpeg(Bytes::from_static(b"JPEG"));

        write_part(&mut sink, &frame).await.unwrap();

        assert_eq!(sink, b"\r\n--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG");
    }

    #[tokio::test]
    async fn write_part_skips_empty_frames() {
        let mut sink = Vec::new();
        write_part(&mut sink, &EncodedFrame::jpeg(Bytes::new())).await.unwrap();
        assert!(sink.is_empty());
    }
}
