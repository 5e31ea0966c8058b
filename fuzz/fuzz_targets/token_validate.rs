//! Fuzz target for ReplayGuard::validate
//!
//! # Strategy
//!
//! - Random strings as tokens (hex, length and AEAD checks)
//! - Genuine tokens with single flipped characters
//! - Random bindings and clocks against genuine tokens
//!
//! # Invariants
//!
//! - Validation NEVER panics
//! - A tampered token is never accepted
//! - A genuine token is accepted at most once

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pixelchat_crypto::{NONCE_SIZE, ReplayGuard};

#[derive(Debug, Arbitrary)]
struct Input {
    key: [u8; 32],
    nonce: [u8; NONCE_SIZE],
    binding: String,
    issued_at: u32,
    checked_after: u16,
    flip: Option<(u16, u8)>,
    junk: String,
}

fuzz_target!(|input: Input| {
    let guard = ReplayGuard::new(input.key, 1024);
    let now = u64::from(input.issued_at);
    let _ = guard.validate(&input.junk, &input.binding, now);

    let token = guard.issue(&input.binding, now, input.nonce);
    let checked_at = now + u64::from(input.checked_after);

    match input.flip {
        Some((at, with)) if !token.is_empty() => {
            let mut bytes = token.into_bytes();
            let at = usize::from(at) % bytes.len();
            let replacement = b"0123456789abcdef"[usize::from(with) % 16];
            if bytes[at] == replacement {
                return;
            }
            bytes[at] = replacement;
            let tampered = String::from_utf8(bytes).unwrap_or_default();
            assert!(guard.validate(&tampered, &input.binding, checked_at).is_err());
        },
        _ => {
            let first = guard.validate(&token, &input.binding, checked_at);
            let second = guard.validate(&token, &input.binding, checked_at);
            assert!(first.is_ok() || second.is_err());
            assert!(second.is_err());
        },
    }
});
