//! Virtual-time environment.
//!
//! Time only moves when a test says so, either through [`SimEnv::advance`]
//! or by awaiting [`Environment::sleep`], which jumps the clock forward and
//! completes immediately. Suitable for single-task tests; concurrent sleeps
//! would each advance the shared clock.

use std::{
    ops::{Add, Sub},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rollcall_core::env::Environment;

/// Point on the virtual clock, measured from simulation start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Simulation start.
    pub const ZERO: Self = Self(Duration::ZERO);

    /// Instant `millis` after simulation start.
    pub fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// Time since simulation start.
    pub fn since_start(self) -> Duration {
        self.0
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}

/// Deterministic environment: virtual clock plus seeded ChaCha8 RNG.
///
/// Clones share the clock and the RNG.
#[derive(Clone)]
pub struct SimEnv {
    clock: Arc<Mutex<Duration>>,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimEnv {
    /// Environment at time zero with the given RNG seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            clock: Arc::new(Mutex::new(Duration::ZERO)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.clock.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }

    /// Time since simulation start.
    pub fn elapsed(&self) -> Duration {
        *self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("elapsed", &self.elapsed()).finish_non_exhaustive()
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(self.elapsed())
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_instant_subtraction_saturates() {
        let early = SimInstant::from_millis(100);
        let late = SimInstant::from_millis(300);

        assert_eq!(late - early, Duration::from_millis(200));
        assert_eq!(early - late, Duration::ZERO);
    }

    #[test]
    fn clones_share_clock() {
        let env = SimEnv::with_seed(1);
        let other = env.clone();

        other.advance(Duration::from_secs(2));
        assert_eq!(env.now(), SimInstant::from_millis(2000));
    }

    #[test]
    fn same_seed_same_bytes() {
        let a = SimEnv::with_seed(42);
        let b = SimEnv::with_seed(42);

        assert_eq!(a.seed(), b.seed());
        assert_eq!(a.random_u64(), b.random_u64());
    }

    #[tokio::test]
    async fn sleep_advances_virtual_clock() {
        let env = SimEnv::with_seed(0);

        env.sleep(Duration::from_millis(1500)).await;
        assert_eq!(env.elapsed(), Duration::from_millis(1500));
    }
}
