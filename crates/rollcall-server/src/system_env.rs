//! Production Environment implementation using the tokio clock and OS RNG.
//!
//! This module provides `SystemEnv`, the production implementation of the
//! `Environment` trait.

use std::time::Duration;

use rollcall_core::env::Environment;

/// Production environment using the tokio clock and cryptographic RNG.
///
/// This implementation:
/// - Uses `tokio::time::Instant::now()` for time, so a paused test runtime
///   controls it
/// - Uses `tokio::time::sleep()` for async sleeping
/// - Uses `getrandom` for cryptographic randomness
///
/// # Security
///
/// The RNG seeds code generation, so it must be unpredictable to anyone
/// outside the room.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).unwrap_or_else(|e| {
            // NOTE: This should never fail on supported platforms. A zero
            // seed makes codes predictable, so shout about it.
            tracing::error!("getrandom failed: {}", e);
            buffer.fill(0);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn system_env_time_follows_tokio_clock() {
        let env = SystemEnv::new();

        let t1 = env.now();
        tokio::time::advance(Duration::from_secs(2)).await;
        let t2 = env.now();

        assert_eq!(t2 - t1, Duration::from_secs(2));
    }

    #[test]
    fn system_env_random_bytes_are_random() {
        let env = SystemEnv::new();

        let mut bytes1 = [0u8; 32];
        let mut bytes2 = [0u8; 32];

        env.random_bytes(&mut bytes1);
        env.random_bytes(&mut bytes2);

        // Extremely unlikely to be equal if random
        assert_ne!(bytes1, bytes2, "Random bytes should differ");
    }

    #[test]
    fn system_env_seeds_differ() {
        let env = SystemEnv::new();
        assert_ne!(env.seed(), env.seed());
    }

    #[tokio::test(start_paused = true)]
    async fn system_env_sleep_works() {
        let env = SystemEnv::new();

        let start = env.now();
        env.sleep(Duration::from_millis(50)).await;
        let elapsed = env.now() - start;

        assert!(elapsed >= Duration::from_millis(50), "Sleep should wait at least 50ms");
    }
}
