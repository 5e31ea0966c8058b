//! Viewer registry for one channel.
//!
//! Maintains session id → viewer and identity → session ids, so fan-out walks
//! every viewer and the join policy finds an identity's sessions in O(1).

use std::{
    collections::{HashMap, HashSet},
    net::IpAddr,
    time::Instant,
};

use pixelchat_render::ViewportClass;

use crate::mailbox::Mailbox;

/// A connected viewer.
#[derive(Clone)]
pub struct ViewerEntry {
    /// Channel-unique session id
    pub session_id: u64,
    /// Resolved identity of the viewer
    pub identity: String,
    /// Viewport class frames are rendered for
    pub class: ViewportClass,
    /// Source address of the connection
    pub address: IpAddr,
    /// When the session joined
    pub joined_at: Instant,
    /// Delivery queue feeding the viewer's connection
    pub mailbox: Mailbox,
}

/// Registry of a channel's viewers.
#[derive(Default)]
pub struct ViewerRegistry {
    /// Session ID → viewer
    sessions: HashMap<u64, ViewerEntry>,
    /// Identity → session IDs (reverse index)
    identities: HashMap<String, HashSet<u64>>,
}

impl ViewerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a viewer.
    ///
    /// Returns `false` if the session id is already registered.
    pub fn register(&mut self, entry: ViewerEntry) -> bool {
        if self.sessions.contains_key(&entry.session_id) {
            return false;
        }

        self.identities.entry(entry.identity.clone()).or_default().insert(entry.session_id);
        self.sessions.insert(entry.session_id, entry);
        true
    }

    /// Remove a viewer, returning it if it was registered.
    pub fn unregister(&mut self, session_id: u64) -> Option<ViewerEntry> {
        let entry = self.sessions.remove(&session_id)?;

        if let Some(ids) = self.identities.get_mut(&entry.identity) {
            ids.remove(&session_id);
            if ids.is_empty() {
                self.identities.remove(&entry.identity);
            }
        }

        Some(entry)
    }

    /// Viewers currently connected under `identity`.
    pub fn sessions_for_identity(&self, identity: &str) -> Vec<&ViewerEntry> {
        self.identities
            .get(identity)
            .map(|ids| ids.iter().filter_map(|id| self.sessions.get(id)).collect())
            .unwrap_or_default()
    }

    /// All viewers, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &ViewerEntry> {
        self.sessions.values()
    }

    /// Number of viewers.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// True if no viewers are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
