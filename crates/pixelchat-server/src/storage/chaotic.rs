//! Chaotic storage wrapper for fault injection testing
//!
//! Storage wrapper that randomly fails operations to test that channels keep
//! serving from memory when persistence breaks.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use pixelchat_proto::Message;

use super::{Storage, StorageError};

const INJECTED: &str = "chaos: injected failure";

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying storage implementation but fails operations
/// with probability `failure_rate`. A failed write never reaches the inner
/// storage.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    operation_count: Arc<AtomicUsize>,
}

/// Linear congruential generator, reproducible for a given seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Wrap `inner` with a fixed default seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Wrap `inner` with an explicit seed for reproducible chaos.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    #[allow(clippy::panic)]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of storage operations attempted.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    fn roll(&self) -> Result<(), StorageError> {
        self.operation_count.fetch_add(1, Ordering::Relaxed);
        let failed = self.rng.lock().unwrap_or_else(PoisonError::into_inner).next() < self.failure_rate;
        if failed { Err(StorageError::Io(INJECTED.to_string())) } else { Ok(()) }
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn append_message(
        &self,
        channel: &str,
        message: &Message,
        active_secs: i64,
        keep: usize,
    ) -> Result<(), StorageError> {
        self.roll()?;
        self.inner.append_message(channel, message, active_secs, keep)
    }

    fn load_messages(&self, channel: &str) -> Result<Vec<Message>, StorageError> {
        self.roll()?;
        self.inner.load_messages(channel)
    }

    fn last_active(&self, channel: &str) -> Result<Option<i64>, StorageError> {
        self.roll()?;
        self.inner.last_active(channel)
    }

    fn recent_channels(&self, limit: usize) -> Result<Vec<(String, i64)>, StorageError> {
        self.roll()?;
        self.inner.recent_channels(limit)
    }

    fn channel_count(&self) -> Result<usize, StorageError> {
        self.roll()?;
        self.inner.channel_count()
    }
}
