//! Clock and randomness seam.
//!
//! Channels and ingress read wall-clock seconds and draw random bytes through
//! [`Environment`] so tests can pin time and seed randomness. [`SystemEnv`]
//! is the production implementation.
//!
//! Timers (auto refresh, purge) use tokio's clock directly; tests pause it
//! with `tokio::time::pause`.

/// Source of time and randomness.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Seconds since the Unix epoch.
    fn wall_clock_secs(&self) -> i64;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// A random `u64`.
    fn random_u64(&self) -> u64 {
        let mut buf = [0u8; 8];
        self.random_bytes(&mut buf);
        u64::from_le_bytes(buf)
    }
}

/// Production environment using the system clock and the OS RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. Tokens and session ids depend on it, and a
/// server without working randomness cannot hand them out safely.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    #[allow(clippy::expect_used)]
    fn wall_clock_secs(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after Unix epoch (1970-01-01)")
            .as_secs() as i64
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}
