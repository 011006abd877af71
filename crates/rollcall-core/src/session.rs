//! Attendance session.
//!
//! One open attendance window for one room. Owns the code rotator and the
//! registry of verification attempts.
//!
//! ## Responsibilities
//!
//! - Code lifecycle: rotate on tick, expose the current code to the presenter
//! - Admission: validate submitted codes against the current or grace epoch
//!   and create at most one live attempt per participant
//! - Deadlines: reject attempts whose capture or verifier deadline passed
//! - Withdrawal: a participant may cancel an attempt still awaiting capture
//! - Closing: reject every live attempt when the presenter ends the session
//!
//! ## Design
//!
//! - Sans-IO: every method takes `now`; nothing here sleeps, spawns, or reads
//!   a clock. The driver serializes access (one lock per session) and runs
//!   verifier calls outside it.
//! - Action-based: `tick` and `close` return [`SessionAction`]s for the driver
//!   to execute (cancel in-flight verifications, notify participants).

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

use rand::Rng;
use rollcall_proto::{PresenterSnapshot, RejectionReason};

use crate::{
    attempt::{AttemptId, AttemptOutcome, AttemptState, AttemptTimeouts, VerificationAttempt},
    code::{Code, CodeRotator, DEFAULT_VALIDITY, GracePolicy, OtpCode},
    env::Timestamp,
    error::{AttemptError, SubmissionError},
    participant::ParticipantId,
    verifier::{CaptureSample, SessionContext},
};

/// Session identifier, used as the routing key by transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Session tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long each code stays current.
    pub cadence: Duration,
    /// How long a superseded code is still honoured.
    pub grace: GracePolicy,
    /// Capture and verifier deadlines.
    pub timeouts: AttemptTimeouts,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cadence: DEFAULT_VALIDITY,
            grace: GracePolicy::default(),
            timeouts: AttemptTimeouts::default(),
        }
    }
}

/// Actions returned by [`Session`] for the driver to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// A new code is on display.
    CodeRotated {
        /// Index of the new epoch.
        epoch: u64,
    },
    /// Abort the verifier call for this attempt; its result is no longer
    /// wanted.
    CancelVerification {
        /// Attempt whose verification is abandoned.
        attempt: AttemptId,
    },
    /// An attempt was rejected by the session itself (deadline or close).
    AttemptRejected {
        /// Rejected attempt.
        attempt: AttemptId,
        /// Its participant.
        participant: ParticipantId,
        /// Why.
        reason: RejectionReason,
    },
}

/// Work order for the driver: run the verifier on this sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    /// Attempt the result belongs to.
    pub attempt: AttemptId,
    /// Sample to verify.
    pub sample: CaptureSample,
    /// Context for the verifier.
    pub context: SessionContext,
}

/// Read-only view for the presenter surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Session identifier.
    pub session_id: SessionId,
    /// Room or class label.
    pub room_label: String,
    /// Code on display.
    pub current_code: OtpCode,
    /// Index of the current epoch.
    pub epoch: u64,
    /// Time until the next rotation.
    pub remaining_validity: Duration,
    /// Accepted attempts.
    pub accepted_count: usize,
    /// Attempts created, terminal or not.
    pub total_attempts: usize,
    /// Attempts not yet terminal.
    pub pending_attempts: usize,
    /// False once closed.
    pub open: bool,
}

impl SessionSnapshot {
    /// Remaining validity in whole seconds, rounded up.
    ///
    /// A 2 s cadence counts down 2, 1 rather than 1, 0.
    pub fn remaining_validity_secs(&self) -> u64 {
        let millis = self.remaining_validity.as_millis();
        u64::try_from(millis.div_ceil(1000)).unwrap_or(u64::MAX)
    }

    /// Convert to the presenter wire payload.
    pub fn to_presenter(&self) -> PresenterSnapshot {
        let clamp = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
        PresenterSnapshot {
            session_id: self.session_id.0,
            room_label: self.room_label.clone(),
            current_code: self.current_code.to_string(),
            remaining_validity_secs: u32::try_from(self.remaining_validity_secs())
                .unwrap_or(u32::MAX),
            accepted_count: clamp(self.accepted_count),
            total_attempts: clamp(self.total_attempts),
            open: self.open,
        }
    }
}

/// One open attendance window.
pub struct Session<I, R> {
    id: SessionId,
    room_label: String,
    config: SessionConfig,
    rotator: CodeRotator<I, R>,
    /// Every attempt ever created, terminal ones included.
    attempts: HashMap<AttemptId, VerificationAttempt<I>>,
    /// Participant -> their non-terminal attempt.
    live: HashMap<ParticipantId, AttemptId>,
    /// Participants with an accepted attempt.
    present: HashSet<ParticipantId>,
    next_attempt: u64,
    opened_at: I,
    closed_at: Option<I>,
}

impl<I, R> Session<I, R>
where
    I: Timestamp,
    R: Rng,
{
    /// Open a session and issue its first code.
    pub fn open(
        id: SessionId,
        room_label: impl Into<String>,
        config: SessionConfig,
        rng: R,
        now: I,
    ) -> Self {
        let rotator = CodeRotator::new(rng, config.cadence, now);
        Self::with_rotator(id, room_label, config, rotator, now)
    }

    /// Open a session around an existing rotator.
    ///
    /// The rotator's validity overrides `config.cadence`.
    pub fn with_rotator(
        id: SessionId,
        room_label: impl Into<String>,
        mut config: SessionConfig,
        rotator: CodeRotator<I, R>,
        now: I,
    ) -> Self {
        config.cadence = rotator.validity();
        let room_label = room_label.into();

        tracing::info!(session = %id, room = %room_label, cadence = ?config.cadence, "session opened");

        Self {
            id,
            room_label,
            config,
            rotator,
            attempts: HashMap::new(),
            live: HashMap::new(),
            present: HashSet::new(),
            next_attempt: 1,
            opened_at: now,
            closed_at: None,
        }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Room or class label.
    pub fn room_label(&self) -> &str {
        &self.room_label
    }

    /// Active configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// When the session opened.
    pub fn opened_at(&self) -> I {
        self.opened_at
    }

    /// When the session closed, if it has.
    pub fn closed_at(&self) -> Option<I> {
        self.closed_at
    }

    /// Returns true until [`close`](Self::close) is called.
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    /// Code currently on display.
    pub fn current_code(&self) -> &Code<I> {
        self.rotator.current()
    }

    /// Code superseded by the last rotation, if any.
    pub fn previous_code(&self) -> Option<&Code<I>> {
        self.rotator.previous()
    }

    /// Accepted attempts so far.
    pub fn accepted_count(&self) -> usize {
        self.present.len()
    }

    /// Attempts created so far.
    pub fn total_attempts(&self) -> usize {
        self.attempts.len()
    }

    /// Attempts not yet terminal.
    pub fn pending_attempts(&self) -> usize {
        self.live.len()
    }

    /// Look up an attempt by handle.
    pub fn attempt(&self, id: AttemptId) -> Option<&VerificationAttempt<I>> {
        self.attempts.get(&id)
    }

    /// Look up a participant's live attempt.
    pub fn live_attempt(&self, participant: &ParticipantId) -> Option<&VerificationAttempt<I>> {
        self.live.get(participant).and_then(|id| self.attempts.get(id))
    }

    /// Iterate over all attempts, in no particular order.
    pub fn attempts(&self) -> impl Iterator<Item = &VerificationAttempt<I>> {
        self.attempts.values()
    }

    /// Advance the rotator and enforce attempt deadlines.
    ///
    /// Expected to be called by a periodic driver more often than the cadence
    /// (e.g. every second) so the countdown stays accurate. Does nothing once
    /// the session is closed.
    pub fn tick(&mut self, now: I) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if !self.is_open() {
            return actions;
        }

        if let Some(epoch) = self.rotate(now) {
            actions.push(SessionAction::CodeRotated { epoch });
        }

        let timeouts = self.config.timeouts;
        let mut expired = Vec::new();
        for &id in self.live.values() {
            let Some(attempt) = self.attempts.get_mut(&id) else { continue };
            let was_verifying = matches!(attempt.state(), AttemptState::Verifying);

            if let Some(reason) = attempt.expire(now, timeouts) {
                tracing::warn!(
                    session = %self.id,
                    attempt = %id,
                    participant = %attempt.participant(),
                    %reason,
                    "attempt deadline passed"
                );
                if was_verifying {
                    actions.push(SessionAction::CancelVerification { attempt: id });
                }
                expired.push((id, attempt.participant().clone(), reason));
            }
        }

        for (attempt, participant, reason) in expired {
            self.live.remove(&participant);
            actions.push(SessionAction::AttemptRejected { attempt, participant, reason });
        }

        actions
    }

    /// Validate a code and open an attempt for `participant`.
    ///
    /// The rotator is ticked first so the code is checked against what the
    /// presenter shows at `now`. The attempt is bound to the matched epoch and
    /// is never re-validated, even if the code rotates during capture.
    ///
    /// # Errors
    ///
    /// - `SessionClosed` once the presenter ended the session
    /// - `MalformedCode` if `code` is not four ASCII digits
    /// - `DuplicateAttempt` if the participant already has a live attempt
    /// - `AlreadyPresent` if the participant was already accepted
    /// - `CodeMismatch` if `code` matches neither current nor grace epoch
    pub fn submit_code(
        &mut self,
        participant: ParticipantId,
        code: &str,
        now: I,
    ) -> Result<AttemptId, SubmissionError> {
        if !self.is_open() {
            return Err(SubmissionError::SessionClosed);
        }
        self.rotate(now);

        let code: OtpCode = code.parse().map_err(|_| SubmissionError::MalformedCode)?;

        if let Some(&attempt) = self.live.get(&participant) {
            return Err(SubmissionError::DuplicateAttempt { participant, attempt });
        }
        if self.present.contains(&participant) {
            return Err(SubmissionError::AlreadyPresent(participant));
        }

        let epoch = self
            .rotator
            .matching(code, now, self.config.grace)
            .ok_or(SubmissionError::CodeMismatch)?;

        let id = AttemptId::new(self.next_attempt);
        self.next_attempt += 1;

        tracing::debug!(
            session = %self.id,
            attempt = %id,
            %participant,
            epoch = epoch.index,
            grace = epoch.index != self.rotator.current().epoch.index,
            "attempt created"
        );

        self.live.insert(participant.clone(), id);
        self.attempts.insert(id, VerificationAttempt::new(id, participant, code, epoch, now));

        Ok(id)
    }

    /// Attach a capture and hand the attempt to the verifier.
    ///
    /// Moves the attempt `AwaitingCapture → CaptureSubmitted → Verifying` and
    /// returns the request the driver must run off the session lock.
    ///
    /// # Errors
    ///
    /// - `UnknownAttempt` for a handle this session never issued
    /// - `AlreadyTerminal` if the attempt already finished
    /// - `CaptureTimeout` if the capture deadline passed; the attempt is now
    ///   rejected with `Timeout`
    /// - `InvalidTransition` if a capture was already provided
    pub fn provide_capture(
        &mut self,
        attempt_id: AttemptId,
        sample: CaptureSample,
        now: I,
    ) -> Result<VerificationRequest, AttemptError> {
        let timeouts = self.config.timeouts;
        let session_open = self.is_open();
        let attempt =
            self.attempts.get_mut(&attempt_id).ok_or(AttemptError::UnknownAttempt(attempt_id))?;

        if !session_open && !attempt.is_terminal() {
            return Err(AttemptError::SessionClosed);
        }

        match attempt.submit_capture(sample.reference(), now, timeouts) {
            Ok(()) => {},
            Err(err @ AttemptError::CaptureTimeout(_)) => {
                let participant = attempt.participant().clone();
                self.live.remove(&participant);
                return Err(err);
            },
            Err(err) => return Err(err),
        }
        attempt.begin_verification()?;

        let context = SessionContext {
            session_id: self.id,
            room_label: self.room_label.clone(),
            participant: attempt.participant().clone(),
            attempt: attempt_id,
            epoch: attempt.epoch().index,
        };

        Ok(VerificationRequest { attempt: attempt_id, sample, context })
    }

    /// Withdraw an attempt that is still waiting for its capture.
    ///
    /// The attempt becomes `Rejected { Cancelled }` and the participant is
    /// free to submit a fresh code straight away.
    ///
    /// # Errors
    ///
    /// - `UnknownAttempt` for a handle this session never issued
    /// - `AlreadyTerminal` if the attempt already finished
    /// - `InvalidTransition` if a capture was already provided
    pub fn cancel_attempt(&mut self, attempt_id: AttemptId, now: I) -> Result<(), AttemptError> {
        let session_open = self.is_open();
        let attempt =
            self.attempts.get_mut(&attempt_id).ok_or(AttemptError::UnknownAttempt(attempt_id))?;

        if !session_open && !attempt.is_terminal() {
            return Err(AttemptError::SessionClosed);
        }

        attempt.cancel(now)?;
        let participant = attempt.participant().clone();

        tracing::info!(session = %self.id, attempt = %attempt_id, %participant, "attempt cancelled");

        self.live.remove(&participant);
        Ok(())
    }

    /// Apply the verifier's outcome to an attempt.
    ///
    /// # Errors
    ///
    /// - `UnknownAttempt` for a handle this session never issued
    /// - `AlreadyTerminal` if a deadline or close got there first; the late
    ///   result is discarded
    /// - `InvalidTransition` if the attempt is not verifying
    pub fn record_outcome(
        &mut self,
        attempt_id: AttemptId,
        outcome: AttemptOutcome,
        now: I,
    ) -> Result<(), AttemptError> {
        let attempt =
            self.attempts.get_mut(&attempt_id).ok_or(AttemptError::UnknownAttempt(attempt_id))?;

        attempt.complete(outcome, now)?;
        let participant = attempt.participant().clone();

        match attempt.state() {
            AttemptState::Accepted { confidence } => {
                tracing::info!(
                    session = %self.id,
                    attempt = %attempt_id,
                    %participant,
                    confidence,
                    "attendance accepted"
                );
                self.present.insert(participant.clone());
            },
            AttemptState::Rejected { reason } => {
                tracing::info!(
                    session = %self.id,
                    attempt = %attempt_id,
                    %participant,
                    %reason,
                    "attendance rejected"
                );
            },
            _ => {},
        }

        self.live.remove(&participant);
        Ok(())
    }

    /// End the session.
    ///
    /// Every non-terminal attempt becomes `Rejected { SessionClosed }`;
    /// verifying ones also get a `CancelVerification`. Rotation stops.
    /// Calling again is a no-op.
    pub fn close(&mut self, now: I) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if !self.is_open() {
            return actions;
        }
        self.closed_at = Some(now);

        for (participant, id) in self.live.drain() {
            let Some(attempt) = self.attempts.get_mut(&id) else { continue };
            if matches!(attempt.state(), AttemptState::Verifying) {
                actions.push(SessionAction::CancelVerification { attempt: id });
            }
            if attempt.reject(RejectionReason::SessionClosed, now).is_ok() {
                actions.push(SessionAction::AttemptRejected {
                    attempt: id,
                    participant,
                    reason: RejectionReason::SessionClosed,
                });
            }
        }

        tracing::info!(
            session = %self.id,
            accepted = self.present.len(),
            attempts = self.attempts.len(),
            "session closed"
        );

        actions
    }

    /// Presenter view at `now`.
    ///
    /// Read-only: does not rotate. A driver that ticks at least once per
    /// second keeps the code fresh.
    pub fn snapshot(&self, now: I) -> SessionSnapshot {
        let current = self.rotator.current();
        let remaining_validity =
            if self.is_open() { current.remaining(now) } else { Duration::ZERO };

        SessionSnapshot {
            session_id: self.id,
            room_label: self.room_label.clone(),
            current_code: current.value,
            epoch: current.epoch.index,
            remaining_validity,
            accepted_count: self.accepted_count(),
            total_attempts: self.total_attempts(),
            pending_attempts: self.pending_attempts(),
            open: self.is_open(),
        }
    }

    fn rotate(&mut self, now: I) -> Option<u64> {
        let before = self.rotator.current().epoch.index;
        let after = self.rotator.tick(now).epoch.index;

        (after != before).then(|| {
            tracing::debug!(session = %self.id, epoch = after, "code rotated");
            after
        })
    }
}

impl<I, R> fmt::Debug for Session<I, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("room_label", &self.room_label)
            .field("attempts", &self.attempts.len())
            .field("live", &self.live.len())
            .field("present", &self.present.len())
            .field("open", &self.closed_at.is_none())
            .finish_non_exhaustive()
    }
}
