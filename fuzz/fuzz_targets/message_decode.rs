//! Fuzz target for Message::decode
//!
//! Arbitrary bytes as a stored record. Looks for:
//! - Panics on truncated headers or length prefixes
//! - Varint overflow in the length prefixes
//! - Allocations sized by attacker-controlled lengths
//!
//! Decoding must never panic, and anything it accepts must re-encode to the
//! same bytes.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pixelchat_proto::Message;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = Message::decode(data) {
        assert_eq!(message.encode(), data);
    }
});
