//! Per-viewer frame mailbox with drop-stale, keep-latest semantics.
//!
//! The producer (a channel refresh) never blocks: each offer first discards
//! whatever the viewer has not read yet, then queues the new frame if there
//! is room. A slow viewer therefore never builds a backlog and always moves
//! toward the latest frame.
//!
//! Displacement is a tagged message into the same mailbox. It wins over any
//! queued frame and closes the mailbox; the viewer's own delivery loop sees
//! it and exits.

#![allow(clippy::disallowed_types, reason = "Critical sections never await")]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use pixelchat_render::EncodedFrame;
use tokio::sync::Notify;

/// What a viewer's delivery loop receives next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Latest frame to write.
    Frame(EncodedFrame),
    /// The identity reconnected elsewhere; write this notice and stop.
    Displaced(EncodedFrame),
    /// The session was closed; nothing more will arrive.
    Closed,
}

#[derive(Default)]
struct State {
    frames: VecDeque<EncodedFrame>,
    displaced: Option<EncodedFrame>,
    closed: bool,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
    capacity: usize,
}

/// Bounded, coalescing frame queue shared by a channel and one viewer.
///
/// Clone is cheap (Arc); clones address the same mailbox.
#[derive(Clone)]
pub struct Mailbox {
    inner: Arc<Inner>,
}

impl Mailbox {
    /// Mailbox holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                capacity,
            }),
        }
    }

    /// Replace any unread frames with `frame`. Never blocks.
    ///
    /// Returns `false` if the mailbox is closed or the frame did not fit.
    pub fn offer(&self, frame: EncodedFrame) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }

        state.frames.clear();
        if state.frames.len() >= self.inner.capacity {
            return false;
        }
        state.frames.push_back(frame);
        drop(state);

        self.inner.notify.notify_one();
        true
    }

    /// Tell the viewer it was displaced, carrying `notice` as its final frame.
    ///
    /// Drops queued frames and closes the mailbox. Fire-and-forget.
    pub fn displace(&self, notice: EncodedFrame) {
        let mut state = self.lock();
        state.frames.clear();
        state.displaced = Some(notice);
        state.closed = true;
        drop(state);

        self.inner.notify.notify_one();
    }

    /// Close without a notice. Pending frames are dropped.
    pub fn close(&self) {
        let mut state = self.lock();
        state.frames.clear();
        state.closed = true;
        drop(state);

        self.inner.notify.notify_one();
    }

    /// True once closed or displaced.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Frames waiting to be read.
    pub fn pending(&self) -> usize {
        self.lock().frames.len()
    }

    /// Next delivery without waiting. `None` if nothing is ready.
    pub fn try_recv(&self) -> Option<Delivery> {
        let mut state = self.lock();
        if let Some(notice) = state.displaced.take() {
            return Some(Delivery::Displaced(notice));
        }
        if let Some(frame) = state.frames.pop_front() {
            return Some(Delivery::Frame(frame));
        }
        state.closed.then_some(Delivery::Closed)
    }

    /// Wait for the next delivery.
    pub async fn recv(&self) -> Delivery {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(delivery) = self.try_recv() {
                return delivery;
            }
            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
