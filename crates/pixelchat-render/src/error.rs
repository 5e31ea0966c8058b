//! Render error types.

use thiserror::Error;

/// Errors produced while loading render assets or encoding frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Grapheme table asset is malformed.
    #[error("grapheme table corrupt at byte {offset}: {reason}")]
    GraphemeTable {
        /// Offset of the offending record
        offset: usize,
        /// What was wrong with it
        reason: &'static str,
    },

    /// Image asset (sprite atlas, font) could not be loaded.
    #[error("asset error: {0}")]
    Asset(String),

    /// Frame encoder failed.
    #[error("encode error: {0}")]
    Encode(String),
}
