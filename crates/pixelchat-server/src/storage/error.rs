use thiserror::Error;

/// Failures reported by a [`Storage`](super::Storage) backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// A stored record could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backend failed to read or write.
    ///
    /// Usually transient (disk full, lock contention). The in-memory channel
    /// state is unaffected.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<pixelchat_proto::ProtocolError> for StorageError {
    fn from(err: pixelchat_proto::ProtocolError) -> Self {
        Self::Serialization(err.to_string())
    }
}
