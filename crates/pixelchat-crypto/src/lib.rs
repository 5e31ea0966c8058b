//! Pixelchat submission tokens
//!
//! Every render of the send form carries a token that authorizes exactly one
//! message submission. The token is an AEAD-sealed payload; the server keeps
//! no per-token state until the token is spent.
//!
//! # Token layout
//!
//! ```text
//! plaintext:  [binding hash: 4][issued at: u32 BE][counter: u32 BE]
//! token:      hex( nonce: 24 || XChaCha20-Poly1305(plaintext) )
//! ```
//!
//! The key lives for the process lifetime. Restarting the server invalidates
//! all outstanding tokens, which is acceptable because forms are cheap to
//! re-render.
//!
//! # Validation order
//!
//! 1. Hex decoding and AEAD authentication (`Malformed`)
//! 2. Binding hash against the submitting connection (`IdentityMismatch`)
//! 3. Age against [`TOKEN_MAX_AGE_SECS`] (`Expired`)
//! 4. Single use, recorded in a bounded LRU set (`Replayed`)
//!
//! Randomness (key and nonces) is supplied by the caller so tests stay
//! deterministic.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod replay;

pub use error::TokenError;
pub use replay::{
    DEFAULT_DEDUP_CAPACITY, NONCE_SIZE, ReplayGuard, TOKEN_MAX_AGE_SECS, binding_hash,
};
