//! Verifier test doubles.
//!
//! Both doubles are cheap handles over shared state: keep a clone in the test
//! to script replies or inspect calls after handing one to a driver.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use rollcall_core::{
    CaptureSample, SessionContext, Verdict, VerifierAdapter, VerifierError, env::Environment,
};

/// Confidence returned once the script runs out.
const FALLBACK_CONFIDENCE: f32 = 0.95;

struct Script {
    replies: VecDeque<Result<Verdict, VerifierError>>,
    calls: Vec<SessionContext>,
}

/// Replies from a queue after a fixed delay on the environment clock.
///
/// Accepts once the queue is empty.
pub struct ScriptedVerifier<E> {
    env: E,
    delay: Duration,
    script: Arc<Mutex<Script>>,
}

impl<E: Environment> ScriptedVerifier<E> {
    /// Verifier that answers immediately.
    pub fn new(env: E) -> Self {
        let script = Script { replies: VecDeque::new(), calls: Vec::new() };
        Self { env, delay: Duration::ZERO, script: Arc::new(Mutex::new(script)) }
    }

    /// Sleep `delay` before every reply.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue the next reply.
    pub fn push(&self, reply: Result<Verdict, VerifierError>) {
        self.lock().replies.push_back(reply);
    }

    /// Contexts of every call so far, in call order.
    pub fn calls(&self) -> Vec<SessionContext> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: Clone> Clone for ScriptedVerifier<E> {
    fn clone(&self) -> Self {
        Self { env: self.env.clone(), delay: self.delay, script: Arc::clone(&self.script) }
    }
}

#[async_trait]
impl<E: Environment> VerifierAdapter for ScriptedVerifier<E> {
    async fn verify(
        &self,
        _sample: CaptureSample,
        context: SessionContext,
    ) -> Result<Verdict, VerifierError> {
        let reply = {
            let mut script = self.lock();
            script.calls.push(context);
            script
                .replies
                .pop_front()
                .unwrap_or(Ok(Verdict::Accept { confidence: FALLBACK_CONFIDENCE }))
        };

        self.env.sleep(self.delay).await;
        reply
    }
}

/// Never answers. Counts calls and how many were dropped unfinished.
#[derive(Clone, Default)]
pub struct PendingVerifier {
    started: Arc<AtomicUsize>,
    abandoned: Arc<AtomicUsize>,
}

impl PendingVerifier {
    /// Fresh counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls made so far.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Calls whose future was dropped, e.g. by task abort.
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl VerifierAdapter for PendingVerifier {
    async fn verify(
        &self,
        _sample: CaptureSample,
        _context: SessionContext,
    ) -> Result<Verdict, VerifierError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let _guard = DropCounter(Arc::clone(&self.abandoned));

        std::future::pending().await
    }
}

#[cfg(test)]
mod tests {
    use rollcall_core::{AttemptId, ParticipantId, SessionId};

    use super::*;
    use crate::SimEnv;

    fn context(attempt: u64) -> SessionContext {
        SessionContext {
            session_id: SessionId(7),
            room_label: "Room 301".to_string(),
            participant: ParticipantId::new("alice"),
            attempt: AttemptId::new(attempt),
            epoch: 0,
        }
    }

    #[tokio::test]
    async fn scripted_replies_in_order_then_accepts() {
        let env = SimEnv::with_seed(0);
        let verifier = ScriptedVerifier::new(env.clone()).with_delay(Duration::from_secs(3));
        verifier.push(Err(VerifierError::Unavailable("down".to_string())));

        let first = verifier.verify(CaptureSample::new(vec![1]), context(1)).await;
        let second = verifier.verify(CaptureSample::new(vec![1]), context(2)).await;

        assert!(first.is_err());
        assert_eq!(second, Ok(Verdict::Accept { confidence: FALLBACK_CONFIDENCE }));
        assert_eq!(env.elapsed(), Duration::from_secs(6));
        assert_eq!(verifier.calls().len(), 2);
    }

    #[tokio::test]
    async fn pending_counts_abandoned_calls() {
        let verifier = PendingVerifier::new();
        let probe = verifier.clone();

        let call = verifier.verify(CaptureSample::new(vec![1]), context(1));
        let timed_out = tokio::time::timeout(Duration::from_millis(1), call).await;

        assert!(timed_out.is_err());
        assert_eq!(probe.started(), 1);
        assert_eq!(probe.abandoned(), 1);
    }
}
