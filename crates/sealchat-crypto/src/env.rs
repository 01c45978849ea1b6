//! Randomness and clock abstraction.
//!
//! The engine never reaches for a global RNG. Every operation that needs
//! fresh bytes (ratchet key pairs, nonces) takes an [`Environment`] so that
//! production code uses the OS RNG and tests replay the exact same sequence
//! from a seed. Message timestamps come from the same place.

use std::sync::{
    Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use rand_chacha::{
    ChaCha20Rng,
    rand_core::{RngCore, SeedableRng},
};

/// Source of randomness for key generation and nonces.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Given the same seed, a deterministic implementation produces the same
///   sequence of bytes
/// - `now_millis()` never goes backwards within one environment
pub trait Environment: Send + Sync {
    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Wall clock in milliseconds since the Unix epoch.
    ///
    /// Only used to timestamp stored messages. The ratchet itself never looks
    /// at the clock.
    fn now_millis(&self) -> u64;

    /// Generates a random fixed-size array.
    fn random_array<const N: usize>(&self) -> [u8; N]
    where
        Self: Sized,
    {
        let mut bytes = [0u8; N];
        self.random_bytes(&mut bytes);
        bytes
    }
}

/// Production environment backed by the operating system RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. Without working entropy no key or nonce can be
/// generated safely, so there is nothing sensible to continue with.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }

    #[allow(clippy::disallowed_methods)]
    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Deterministic environment for tests and simulation.
///
/// ChaCha20 stream seeded from 32 bytes. Two environments built from the same
/// seed produce identical key pairs and nonces. The clock is virtual: it
/// starts at zero and advances one millisecond per reading.
#[derive(Debug)]
pub struct SeededEnv {
    rng: Mutex<ChaCha20Rng>,
    clock: AtomicU64,
}

impl SeededEnv {
    /// Create an environment from a fixed seed.
    pub fn new(seed: [u8; 32]) -> Self {
        Self { rng: Mutex::new(ChaCha20Rng::from_seed(seed)), clock: AtomicU64::new(0) }
    }

    /// Create an environment from a `u64` seed (convenient for property tests).
    pub fn from_u64(seed: u64) -> Self {
        Self { rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)), clock: AtomicU64::new(0) }
    }
}

impl Environment for SeededEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        // A panic while filling bytes leaves the RNG in a valid state.
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }

    fn now_millis(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}
