//! Replay guard: sealed, single-use submission tokens.

use std::sync::atomic::{AtomicU32, Ordering};

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use moka::{policy::EvictionPolicy, sync::Cache};
use sha2::{Digest, Sha256};

use crate::error::TokenError;

/// `XChaCha20` nonce size.
pub const NONCE_SIZE: usize = 24;

/// Tokens older than this are refused even if never used.
pub const TOKEN_MAX_AGE_SECS: u64 = 24 * 60 * 60;

/// Default number of spent payloads remembered.
pub const DEFAULT_DEDUP_CAPACITY: u64 = 60_000;

const PAYLOAD_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const SEALED_SIZE: usize = NONCE_SIZE + PAYLOAD_SIZE + TAG_SIZE;

/// Issues and validates submission tokens.
///
/// Cloning is not supported; share one guard per process behind an `Arc`.
pub struct ReplayGuard {
    cipher: XChaCha20Poly1305,
    counter: AtomicU32,
    seen: Cache<[u8; PAYLOAD_SIZE], ()>,
}

impl ReplayGuard {
    /// Create a guard sealing under `key`, remembering up to `capacity` spent
    /// tokens.
    pub fn new(key: [u8; 32], capacity: u64) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new((&key).into()),
            counter: AtomicU32::new(0),
            // LRU admits every new key; TinyLFU may reject a just-spent token.
            seen: Cache::builder().max_capacity(capacity).eviction_policy(EvictionPolicy::lru()).build(),
        }
    }

    /// Seal a token for `binding` (identity plus address) issued at `now_secs`.
    ///
    /// Caller MUST provide a fresh random nonce per token in production.
    pub fn issue(&self, binding: &str, now_secs: u64, nonce: [u8; NONCE_SIZE]) -> String {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);

        let mut payload = [0u8; PAYLOAD_SIZE];
        payload[0..4].copy_from_slice(&binding_hash(binding));
        payload[4..8].copy_from_slice(&(now_secs as u32).to_be_bytes());
        payload[8..12].copy_from_slice(&counter.to_be_bytes());

        let Ok(ciphertext) = self.cipher.encrypt(XNonce::from_slice(&nonce), payload.as_slice())
        else {
            unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
        };

        let mut sealed = Vec::with_capacity(SEALED_SIZE);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        hex::encode(sealed)
    }

    /// Validate and spend a token presented by `binding` at `now_secs`.
    ///
    /// # Errors
    ///
    /// See [`TokenError`]. A token is only recorded as spent once it has passed
    /// every other check, so a mismatched or expired presentation does not burn
    /// it.
    pub fn validate(&self, token: &str, binding: &str, now_secs: u64) -> Result<(), TokenError> {
        let sealed = hex::decode(token).map_err(|_| TokenError::Malformed)?;
        if sealed.len() != SEALED_SIZE {
            return Err(TokenError::Malformed);
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| TokenError::Malformed)?;

        let payload: [u8; PAYLOAD_SIZE] =
            plaintext.as_slice().try_into().map_err(|_| TokenError::Malformed)?;

        if payload[0..4] != binding_hash(binding) {
            return Err(TokenError::IdentityMismatch);
        }

        let issued_at = u64::from(u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]));
        let age_secs = (now_secs as u32 as u64).saturating_sub(issued_at);
        if age_secs > TOKEN_MAX_AGE_SECS {
            return Err(TokenError::Expired { age_secs });
        }

        if !self.seen.entry(payload).or_insert(()).is_fresh() {
            return Err(TokenError::Replayed);
        }

        Ok(())
    }

    /// Number of spent tokens currently remembered (approximate).
    pub fn remembered(&self) -> u64 {
        self.seen.run_pending_tasks();
        self.seen.entry_count()
    }
}

/// First four bytes of SHA-256 over the binding string.
pub fn binding_hash(binding: &str) -> [u8; 4] {
    let digest = Sha256::digest(binding.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}
