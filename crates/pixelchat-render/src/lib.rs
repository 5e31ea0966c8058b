//! Pixelchat frame rendering
//!
//! Turns a channel's message log into a bitmap: text is wrapped with
//! per-codepoint advances and pairwise kerning, emoji clusters are replaced by
//! sprites from an atlas, links get numbered badges, and a status bar is drawn
//! along the bottom edge.
//!
//! # Components
//!
//! - [`GraphemeTable`]: lead code point to emoji cluster lookup, built once
//! - [`GlyphFace`]: font metrics and rasterization ([`CosmicFace`] for real
//!   fonts, [`FixedFace`] for deterministic metrics)
//! - [`FacePool`]: recycles faces across renders, panic-safe
//! - [`layout_message`]: wraps one message into positioned glyphs and overlays
//! - [`FrameRenderer`]: composes frames and error frames, encodes them
//!
//! Rendering never holds channel locks: callers snapshot a [`FrameInput`] and
//! render outside their critical section.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod encode;
mod error;
mod face;
mod frame;
mod grapheme;
mod layout;
mod paint;
mod pool;

pub use encode::{DEFAULT_JPEG_QUALITY, EncodedFrame, FrameFormat};
pub use error::RenderError;
pub use face::{CosmicFace, FONT_SIZE, FixedFace, GlyphFace};
pub use frame::{
    BAR_HEIGHT, FrameInput, FrameRenderer, LINE_HEIGHT, RenderedFrame, ViewportClass,
    traffic_readout,
};
pub use grapheme::{GraphemeMatch, GraphemeTable, SPRITE_SIZE, SPRITES_PER_ROW, SpriteCell};
pub use layout::{
    CONTENT_LEFT, EMOJI_ADVANCE, LaidLine, MAX_LINKS, MAX_MESSAGE_LINES, MessageLayout, Overlay,
    OverlayKind, PlacedGlyph, WRAP_MARGIN, is_invisible, layout_message,
};
pub use pool::{FacePool, PooledFace};
