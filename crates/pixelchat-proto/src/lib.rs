//! Pixelchat message records.
//!
//! A channel's history is a bounded log of [`Message`]s. This crate owns the
//! record type and its binary layout, shared by the in-memory log, the
//! durable store and the frame renderer.
//!
//! # Record layout
//!
//! ```text
//! [id: u64 BE][kind: u64 BE][unix_time: i64 BE]
//! [uvarint len][author bytes][uvarint len][text bytes]
//! ```
//!
//! The fixed-width header keeps records cheap to skim; the two strings are
//! length-prefixed with unsigned LEB128 varints.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod errors;
mod message;
mod varint;

pub use errors::{ProtocolError, Result};
pub use message::{ID_EPOCH_OFFSET, Message, MessageKind, message_id};
