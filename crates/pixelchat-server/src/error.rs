//! Server error types.

use std::fmt;

use pixelchat_render::RenderError;

use crate::storage::StorageError;

/// Errors that can stop the server from starting or serving.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (unreadable asset, bad bind address, etc.).
    ///
    /// Fatal at startup. Fix configuration and restart.
    Config(String),

    /// Transport/network error (bind failure, accept loop failure).
    Transport(String),

    /// The message store could not be opened.
    ///
    /// Fatal at startup; at runtime storage errors are handled per channel.
    Storage(StorageError),

    /// A render asset (emoji table, sprite atlas) is invalid.
    Render(RenderError),

    /// Internal error (unexpected state, logic bug, etc.).
    ///
    /// Should never happen in correct implementation. Indicates a bug.
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
            Self::Render(err) => write!(f, "render error: {err}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            Self::Render(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for ServerError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<RenderError> for ServerError {
    fn from(err: RenderError) -> Self {
        Self::Render(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
