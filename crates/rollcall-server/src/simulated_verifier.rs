//! Stand-in verifier for demos.
//!
//! A fixed processing delay followed by a weighted coin flip. Never use it
//! where attendance matters.

use std::{sync::Mutex, time::Duration};

use async_trait::async_trait;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rollcall_core::{
    CaptureSample, SessionContext, Verdict, VerifierAdapter, VerifierError, env::Environment,
};

use crate::ServerError;

/// Lowest confidence reported on accept.
const MIN_CONFIDENCE: f32 = 0.85;

/// Verifier that accepts with a fixed probability after a fixed delay.
pub struct SimulatedVerifier<E> {
    env: E,
    delay: Duration,
    accept_rate: f64,
    rng: Mutex<StdRng>,
}

impl<E: Environment> SimulatedVerifier<E> {
    /// Reference behaviour: 3 s delay, 85% acceptance.
    pub fn new(env: E) -> Self {
        Self::build(env, Duration::from_secs(3), 0.85)
    }

    /// Custom delay and acceptance probability.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` unless `accept_rate` is a number in
    /// `[0, 1]`.
    pub fn with_params(env: E, delay: Duration, accept_rate: f64) -> Result<Self, ServerError> {
        if !(0.0..=1.0).contains(&accept_rate) {
            return Err(ServerError::Config(format!(
                "accept rate must be within [0, 1], got {accept_rate}"
            )));
        }
        Ok(Self::build(env, delay, accept_rate))
    }

    fn build(env: E, delay: Duration, accept_rate: f64) -> Self {
        let rng = Mutex::new(StdRng::from_seed(env.seed()));
        Self { env, delay, accept_rate, rng }
    }
}

#[async_trait]
impl<E: Environment> VerifierAdapter for SimulatedVerifier<E> {
    async fn verify(
        &self,
        sample: CaptureSample,
        context: SessionContext,
    ) -> Result<Verdict, VerifierError> {
        let verdict = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| VerifierError::Unavailable("rng poisoned".to_string()))?;

            if sample.data.is_empty() {
                Verdict::Reject { reason: "empty capture".to_string() }
            } else if rng.gen_bool(self.accept_rate) {
                Verdict::Accept { confidence: rng.gen_range(MIN_CONFIDENCE..1.0) }
            } else {
                Verdict::Reject { reason: "face not recognised".to_string() }
            }
        };

        tracing::debug!(
            attempt = %context.attempt,
            participant = %context.participant,
            delay = ?self.delay,
            "simulating verification"
        );
        self.env.sleep(self.delay).await;

        Ok(verdict)
    }
}
