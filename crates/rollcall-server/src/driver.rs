//! Session driver
//!
//! Runs one [`Session`] on the tokio runtime.
//!
//! ## Responsibilities
//!
//! - Serialization: all session reads and writes go through one mutex, so a
//!   rotation and a submission can never interleave mid-update
//! - Rotation: a periodic task ticks the session at `tick_interval`
//! - Verification: verifier calls run as separate tasks, outside the lock,
//!   and re-enter it only to record the outcome
//! - Cancellation: deadline and close actions abort in-flight verifier tasks

use std::{collections::HashMap, sync::Arc, time::Duration};

use rand::{SeedableRng, rngs::StdRng};
use rollcall_core::{
    AttemptError, AttemptId, AttemptOutcome, AttemptState, CaptureSample, CodeRotator, OtpCode,
    ParticipantId, Session, SessionAction, SessionConfig, SessionId, SessionSnapshot,
    SubmissionError, VerificationRequest, VerifierAdapter, VerifierError, env::Environment,
};
use rollcall_proto::{
    ParticipantRequest, ParticipantResponse, ProvideCapture, RejectionReason, SubmitCode,
};
use tokio::{
    sync::{Mutex, watch},
    task::AbortHandle,
};

use crate::ServerError;

/// Driver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Session tuning (cadence, grace, deadlines).
    pub session: SessionConfig,
    /// How often the session is ticked. Should be finer than the cadence.
    pub tick_interval: Duration,
    /// Pin the first code instead of drawing it.
    pub initial_code: Option<OtpCode>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            tick_interval: Duration::from_secs(1),
            initial_code: None,
        }
    }
}

impl DriverConfig {
    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if any interval is zero or the tick
    /// interval is coarser than the cadence.
    pub fn validate(&self) -> Result<(), ServerError> {
        let timeouts = self.session.timeouts;
        if self.session.cadence.is_zero() {
            return Err(ServerError::Config("cadence must be positive".to_string()));
        }
        if self.tick_interval.is_zero() {
            return Err(ServerError::Config("tick interval must be positive".to_string()));
        }
        if self.tick_interval > self.session.cadence {
            return Err(ServerError::Config(format!(
                "tick interval {:?} is longer than the cadence {:?}",
                self.tick_interval, self.session.cadence
            )));
        }
        if timeouts.capture.is_zero() || timeouts.verifier.is_zero() {
            return Err(ServerError::Config("attempt timeouts must be positive".to_string()));
        }
        Ok(())
    }
}

/// State shared between the driver handle and its background tasks.
struct Shared<E, V>
where
    E: Environment,
{
    env: E,
    verifier: Arc<V>,
    config: DriverConfig,
    session: Mutex<Session<E::Instant, StdRng>>,
    /// Abort handles for verifier calls still running.
    in_flight: Mutex<HashMap<AttemptId, AbortHandle>>,
    /// Bumped after every state change.
    changes: watch::Sender<u64>,
}

impl<E, V> Shared<E, V>
where
    E: Environment,
    V: VerifierAdapter,
{
    fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    async fn execute(&self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::CodeRotated { epoch } => {
                    tracing::trace!(epoch, "rotation");
                },
                SessionAction::CancelVerification { attempt } => {
                    if let Some(handle) = self.in_flight.lock().await.remove(&attempt) {
                        handle.abort();
                        tracing::debug!(%attempt, "verification cancelled");
                    }
                },
                SessionAction::AttemptRejected { attempt, participant, reason } => {
                    tracing::debug!(%attempt, %participant, %reason, "attempt rejected by session");
                },
            }
        }
    }

    async fn tick(&self) -> bool {
        let (actions, open) = {
            let mut session = self.session.lock().await;
            let actions = session.tick(self.env.now());
            (actions, session.is_open())
        };

        self.execute(actions).await;
        self.notify();
        open
    }

    async fn verify(self: Arc<Self>, request: VerificationRequest) {
        let VerificationRequest { attempt, sample, context } = request;
        let timeout = self.config.session.timeouts.verifier;

        let result = tokio::select! {
            result = self.verifier.verify(sample, context) => result,
            () = self.env.sleep(timeout) => {
                Err(VerifierError::Unavailable(format!("no answer within {timeout:?}")))
            },
        };

        if let Err(e) = &result {
            tracing::warn!(%attempt, "verifier failed: {}", e);
        }

        let outcome = AttemptOutcome::from_verifier(result);
        let recorded = self.session.lock().await.record_outcome(attempt, outcome, self.env.now());

        match recorded {
            Ok(()) => self.notify(),
            Err(AttemptError::AlreadyTerminal(_)) => {
                tracing::debug!(%attempt, "late verifier result discarded");
            },
            Err(e) => tracing::warn!(%attempt, "could not record outcome: {}", e),
        }

        self.in_flight.lock().await.remove(&attempt);
    }
}

/// Runs one attendance session on tokio.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct SessionDriver<E, V>
where
    E: Environment,
{
    id: SessionId,
    shared: Arc<Shared<E, V>>,
    ticker: AbortHandle,
}

impl<E, V> SessionDriver<E, V>
where
    E: Environment,
    V: VerifierAdapter,
{
    /// Open a session and start its tick loop.
    ///
    /// The session ID and the code generator seed come from `env`.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if `config` fails validation.
    pub fn open(
        env: E,
        verifier: V,
        room_label: impl Into<String>,
        config: DriverConfig,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let id = SessionId(env.random_u64());
        let rng = StdRng::from_seed(env.seed());
        let now = env.now();

        let session = match config.initial_code {
            Some(code) => {
                let rotator = CodeRotator::with_initial(rng, code, config.session.cadence, now);
                Session::with_rotator(id, room_label, config.session, rotator, now)
            },
            None => Session::open(id, room_label, config.session, rng, now),
        };

        let (changes, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            env,
            verifier: Arc::new(verifier),
            config,
            session: Mutex::new(session),
            in_flight: Mutex::new(HashMap::new()),
            changes,
        });

        let ticker = tokio::spawn(run_ticker(Arc::clone(&shared))).abort_handle();

        Ok(Self { id, shared, ticker })
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Receiver that changes whenever session state does.
    ///
    /// Presenter surfaces that push rather than poll wait on this.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.changes.subscribe()
    }

    /// Submit a code on behalf of `participant`.
    ///
    /// # Errors
    ///
    /// See [`Session::submit_code`].
    pub async fn submit_code(
        &self,
        participant: ParticipantId,
        code: &str,
    ) -> Result<AttemptId, SubmissionError> {
        let result = {
            let mut session = self.shared.session.lock().await;
            session.submit_code(participant, code, self.shared.env.now())
        };

        if result.is_ok() {
            self.shared.notify();
        }
        result
    }

    /// Provide the capture for an attempt and start verification.
    ///
    /// Returns once the verifier task is spawned; use
    /// [`wait_for_outcome`](Self::wait_for_outcome) for the result.
    ///
    /// # Errors
    ///
    /// See [`Session::provide_capture`].
    pub async fn provide_capture(
        &self,
        attempt: AttemptId,
        sample: CaptureSample,
    ) -> Result<(), AttemptError> {
        let mut in_flight = self.shared.in_flight.lock().await;

        let request = {
            let mut session = self.shared.session.lock().await;
            session.provide_capture(attempt, sample, self.shared.env.now())
        };
        self.shared.notify();
        let request = request?;

        let task = tokio::spawn(Arc::clone(&self.shared).verify(request));
        in_flight.insert(attempt, task.abort_handle());

        Ok(())
    }

    /// Withdraw an attempt still waiting for its capture.
    ///
    /// # Errors
    ///
    /// See [`Session::cancel_attempt`].
    pub async fn cancel_attempt(&self, attempt: AttemptId) -> Result<(), AttemptError> {
        let result = {
            let mut session = self.shared.session.lock().await;
            session.cancel_attempt(attempt, self.shared.env.now())
        };

        if result.is_ok() {
            self.shared.notify();
        }
        result
    }

    /// Presenter view.
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.shared.session.lock().await.snapshot(self.shared.env.now())
    }

    /// Current state of an attempt.
    pub async fn attempt_state(&self, attempt: AttemptId) -> Option<AttemptState> {
        self.shared.session.lock().await.attempt(attempt).map(|a| a.state().clone())
    }

    /// Wait until an attempt is terminal and return its final state.
    ///
    /// Every attempt has a deadline, so this always finishes.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAttempt` if the session never issued `attempt`.
    pub async fn wait_for_outcome(&self, attempt: AttemptId) -> Result<AttemptState, AttemptError> {
        let mut changes = self.subscribe();

        loop {
            let state =
                self.attempt_state(attempt).await.ok_or(AttemptError::UnknownAttempt(attempt))?;
            if state.is_terminal() || changes.changed().await.is_err() {
                return Ok(state);
            }
        }
    }

    /// Handle a participant request.
    pub async fn handle(&self, request: ParticipantRequest) -> ParticipantResponse {
        match request {
            ParticipantRequest::SubmitCode(SubmitCode { participant_id, code }) => {
                match self.submit_code(ParticipantId::new(participant_id), &code).await {
                    Ok(attempt) => {
                        let epoch = self
                            .shared
                            .session
                            .lock()
                            .await
                            .attempt(attempt)
                            .map_or(0, |a| a.epoch().index);
                        ParticipantResponse::AttemptCreated { attempt_id: attempt.value(), epoch }
                    },
                    Err(e) => e.to_response(),
                }
            },
            ParticipantRequest::ProvideCapture(ProvideCapture { attempt_id, media_type, sample }) => {
                let attempt = AttemptId::new(attempt_id);
                let sample = CaptureSample { data: sample, media_type };
                match self.provide_capture(attempt, sample).await {
                    Ok(()) => ParticipantResponse::Pending { attempt_id },
                    Err(e) => e.to_response(),
                }
            },
            ParticipantRequest::PollAttempt { attempt_id } => {
                match self.attempt_state(AttemptId::new(attempt_id)).await {
                    Some(AttemptState::Accepted { confidence }) => {
                        ParticipantResponse::Accepted { attempt_id, confidence }
                    },
                    Some(AttemptState::Rejected { reason }) => {
                        ParticipantResponse::Rejected { attempt_id, reason }
                    },
                    Some(_) => ParticipantResponse::Pending { attempt_id },
                    None => ParticipantResponse::UnknownAttempt { attempt_id },
                }
            },
            ParticipantRequest::CancelAttempt { attempt_id } => {
                match self.cancel_attempt(AttemptId::new(attempt_id)).await {
                    Ok(()) => ParticipantResponse::Rejected {
                        attempt_id,
                        reason: RejectionReason::Cancelled,
                    },
                    Err(e) => e.to_response(),
                }
            },
        }
    }

    /// Decode a CBOR participant request, handle it, and encode the response.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Protocol` if the request cannot be decoded or the
    /// response cannot be encoded.
    pub async fn handle_bytes(&self, request: &[u8]) -> Result<Vec<u8>, ServerError> {
        let request: ParticipantRequest = rollcall_proto::decode(request)?;
        let response = self.handle(request).await;
        Ok(rollcall_proto::encode(&response)?)
    }

    /// CBOR-encoded presenter snapshot.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Protocol` if encoding fails.
    pub async fn presenter_bytes(&self) -> Result<Vec<u8>, ServerError> {
        let snapshot = self.snapshot().await.to_presenter();
        Ok(rollcall_proto::encode(&snapshot)?)
    }

    /// End the session.
    ///
    /// Stops rotation, rejects every live attempt with `SessionClosed`, and
    /// aborts verifier calls still running. Returns the final snapshot.
    pub async fn close(&self) -> SessionSnapshot {
        self.ticker.abort();

        let (actions, snapshot) = {
            let mut session = self.shared.session.lock().await;
            let now = self.shared.env.now();
            let actions = session.close(now);
            (actions, session.snapshot(now))
        };

        self.shared.execute(actions).await;
        for (_, handle) in self.shared.in_flight.lock().await.drain() {
            handle.abort();
        }
        self.shared.notify();

        snapshot
    }
}

impl<E, V> Drop for SessionDriver<E, V>
where
    E: Environment,
{
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

impl<E, V> std::fmt::Debug for SessionDriver<E, V>
where
    E: Environment,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDriver")
            .field("id", &self.id)
            .field("tick_interval", &self.shared.config.tick_interval)
            .finish_non_exhaustive()
    }
}

async fn run_ticker<E, V>(shared: Arc<Shared<E, V>>)
where
    E: Environment,
    V: VerifierAdapter,
{
    let interval = shared.config.tick_interval;

    loop {
        shared.env.sleep(interval).await;
        if !shared.tick().await {
            break;
        }
    }

    tracing::debug!("tick loop stopped");
}
