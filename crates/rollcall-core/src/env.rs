//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples session logic from system resources
//! (time, randomness). This enables:
//!
//! - Deterministic Simulation: a virtual clock and seeded RNG reproduce any
//!   interleaving of rotations, submissions and verifier replies exactly.
//!
//! - Production Runtime: the tokio clock and OS entropy are used without any
//!   change to the session logic.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::{fmt::Debug, future::Future, ops::Sub, time::Duration};

/// A point in time as seen by the session.
///
/// Subtraction must saturate at zero rather than panic, as both
/// `std::time::Instant` and `tokio::time::Instant` do.
pub trait Timestamp:
    Copy + Ord + Debug + Send + Sync + 'static + Sub<Output = Duration>
{
}

impl<T> Timestamp for T where T: Copy + Ord + Debug + Send + Sync + 'static + Sub<Output = Duration> {}

/// Abstract environment providing time, randomness, and async sleeping.
///
/// Session and attempt state machines never call this directly; they take
/// `now` as an argument. Drivers own an `Environment` and feed it in.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// 1. Time monotonicity: `now()` never goes backwards
/// 2. RNG quality: `random_bytes()` uses cryptographically secure entropy in
///    production, since it seeds code generation
pub trait Environment: Clone + Send + Sync + 'static {
    /// Clock type produced by [`Environment::now`].
    type Instant: Timestamp;

    /// Returns the current time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: Subsequent calls must return times >= previous calls.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait, and it should only be used
    /// by driver code (tick loops, verifier deadlines).
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    ///
    /// Used for session identifiers.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Draws a 32-byte seed for a `rand` generator.
    fn seed(&self) -> [u8; 32] {
        let mut seed = [0u8; 32];
        self.random_bytes(&mut seed);
        seed
    }
}
