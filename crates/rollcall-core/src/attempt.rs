//! Verification attempt state machine.
//!
//! One participant's claim of presence, from code submission to a terminal
//! outcome.
//!
//! ```text
//! AwaitingCapture ──capture──▶ CaptureSubmitted ──▶ Verifying ──▶ Accepted
//!        │                                             │
//!        └──── cancel / deadline / close ──────────────┴────────▶ Rejected
//! ```
//!
//! # Invariants
//!
//! - The code epoch is bound once, at creation, and never re-checked. A
//!   rotation during capture does not affect the attempt.
//! - No transition out of `Accepted` or `Rejected`.
//! - Every non-terminal state has a deadline, so nothing stays pending
//!   forever.

use std::{fmt, time::Duration};

use rollcall_proto::RejectionReason;

use crate::{
    code::{Epoch, OtpCode},
    env::Timestamp,
    error::AttemptError,
    participant::ParticipantId,
    verifier::{SampleRef, Verdict, VerifierError},
};

/// Handle for an attempt, unique within its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(u64);

impl AttemptId {
    /// Wrap a raw handle.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw handle value, as carried on the wire.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Attempt lifecycle state.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptState {
    /// Code accepted, waiting for the participant's capture.
    AwaitingCapture,
    /// Capture received, verifier not yet invoked.
    CaptureSubmitted,
    /// Verifier call in flight.
    Verifying,
    /// Attendance recorded.
    Accepted {
        /// Verifier confidence.
        confidence: f32,
    },
    /// Attempt failed.
    Rejected {
        /// Why.
        reason: RejectionReason,
    },
}

impl AttemptState {
    /// Returns true for `Accepted` and `Rejected`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted { .. } | Self::Rejected { .. })
    }

    /// Short name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitingCapture => "awaiting capture",
            Self::CaptureSubmitted => "capture submitted",
            Self::Verifying => "verifying",
            Self::Accepted { .. } => "accepted",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// Terminal result to apply to an attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Attendance recorded.
    Accepted {
        /// Verifier confidence.
        confidence: f32,
    },
    /// Attempt failed.
    Rejected(RejectionReason),
}

impl AttemptOutcome {
    /// Map a verifier reply onto an outcome.
    ///
    /// An adapter failure is a rejection with `VerifierUnavailable`, never a
    /// pending attempt.
    pub fn from_verifier(result: Result<Verdict, VerifierError>) -> Self {
        match result {
            Ok(Verdict::Accept { confidence }) => Self::Accepted { confidence },
            Ok(Verdict::Reject { reason }) => {
                Self::Rejected(RejectionReason::VerifierRejected { detail: reason })
            },
            Err(VerifierError::Unavailable(_)) => {
                Self::Rejected(RejectionReason::VerifierUnavailable)
            },
        }
    }

    fn into_state(self) -> AttemptState {
        match self {
            Self::Accepted { confidence } => AttemptState::Accepted { confidence },
            Self::Rejected(reason) => AttemptState::Rejected { reason },
        }
    }
}

/// Deadlines applied to non-terminal attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTimeouts {
    /// Time from submission allowed for the capture to arrive.
    pub capture: Duration,
    /// Time from capture allowed for the verifier to answer.
    pub verifier: Duration,
}

impl Default for AttemptTimeouts {
    fn default() -> Self {
        Self { capture: Duration::from_secs(60), verifier: Duration::from_secs(10) }
    }
}

/// One participant's claim of presence.
#[derive(Debug, Clone)]
pub struct VerificationAttempt<I> {
    id: AttemptId,
    participant: ParticipantId,
    code: OtpCode,
    epoch: Epoch<I>,
    submitted_at: I,
    state: AttemptState,
    sample: Option<SampleRef>,
    captured_at: Option<I>,
    completed_at: Option<I>,
}

impl<I: Timestamp> VerificationAttempt<I> {
    /// Create an attempt bound to `epoch`, awaiting capture.
    pub fn new(
        id: AttemptId,
        participant: ParticipantId,
        code: OtpCode,
        epoch: Epoch<I>,
        submitted_at: I,
    ) -> Self {
        Self {
            id,
            participant,
            code,
            epoch,
            submitted_at,
            state: AttemptState::AwaitingCapture,
            sample: None,
            captured_at: None,
            completed_at: None,
        }
    }

    /// Attempt handle.
    pub fn id(&self) -> AttemptId {
        self.id
    }

    /// Who submitted.
    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    /// Code value that was submitted.
    pub fn code(&self) -> OtpCode {
        self.code
    }

    /// Epoch the submission was validated against.
    pub fn epoch(&self) -> Epoch<I> {
        self.epoch
    }

    /// When the code was submitted.
    pub fn submitted_at(&self) -> I {
        self.submitted_at
    }

    /// Current state.
    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    /// Reference to the captured sample, once provided.
    pub fn sample(&self) -> Option<&SampleRef> {
        self.sample.as_ref()
    }

    /// When the capture arrived.
    pub fn captured_at(&self) -> Option<I> {
        self.captured_at
    }

    /// When the attempt became terminal.
    pub fn completed_at(&self) -> Option<I> {
        self.completed_at
    }

    /// Returns true once the attempt is `Accepted` or `Rejected`.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// `AwaitingCapture → CaptureSubmitted`.
    ///
    /// If the capture deadline has already passed the attempt is rejected with
    /// `Timeout` instead and `CaptureTimeout` is returned.
    pub fn submit_capture(
        &mut self,
        sample: SampleRef,
        now: I,
        timeouts: AttemptTimeouts,
    ) -> Result<(), AttemptError> {
        self.expect_state(&AttemptState::AwaitingCapture, "submit capture")?;

        if now - self.submitted_at >= timeouts.capture {
            self.finish(AttemptOutcome::Rejected(RejectionReason::Timeout), now);
            return Err(AttemptError::CaptureTimeout(self.id));
        }

        self.sample = Some(sample);
        self.captured_at = Some(now);
        self.state = AttemptState::CaptureSubmitted;

        tracing::debug!(attempt = %self.id, participant = %self.participant, "capture submitted");
        Ok(())
    }

    /// `CaptureSubmitted → Verifying`.
    pub fn begin_verification(&mut self) -> Result<(), AttemptError> {
        self.expect_state(&AttemptState::CaptureSubmitted, "begin verification")?;
        self.state = AttemptState::Verifying;
        Ok(())
    }

    /// `Verifying → Accepted | Rejected` with the verifier's outcome.
    pub fn complete(&mut self, outcome: AttemptOutcome, now: I) -> Result<(), AttemptError> {
        self.expect_state(&AttemptState::Verifying, "complete")?;
        self.finish(outcome, now);
        Ok(())
    }

    /// `AwaitingCapture → Rejected { Cancelled }`.
    ///
    /// Only an attempt still waiting for its capture can be withdrawn. Once a
    /// sample is with the verifier the participant waits for the verdict.
    pub fn cancel(&mut self, now: I) -> Result<(), AttemptError> {
        self.expect_state(&AttemptState::AwaitingCapture, "cancel")?;
        self.finish(AttemptOutcome::Rejected(RejectionReason::Cancelled), now);
        Ok(())
    }

    /// Reject from any non-terminal state.
    pub fn reject(&mut self, reason: RejectionReason, now: I) -> Result<(), AttemptError> {
        if self.is_terminal() {
            return Err(AttemptError::AlreadyTerminal(self.id));
        }
        self.finish(AttemptOutcome::Rejected(reason), now);
        Ok(())
    }

    /// Apply whichever deadline has passed, if any.
    ///
    /// Returns the rejection reason when the attempt transitioned. A missed
    /// capture deadline is `Timeout`; a verifier that has not answered in time
    /// is `VerifierUnavailable`.
    pub fn expire(&mut self, now: I, timeouts: AttemptTimeouts) -> Option<RejectionReason> {
        let reason = match self.state {
            AttemptState::AwaitingCapture if now - self.submitted_at >= timeouts.capture => {
                RejectionReason::Timeout
            },
            AttemptState::CaptureSubmitted | AttemptState::Verifying => {
                let captured_at = self.captured_at.unwrap_or(self.submitted_at);
                if now - captured_at < timeouts.verifier {
                    return None;
                }
                RejectionReason::VerifierUnavailable
            },
            _ => return None,
        };

        self.finish(AttemptOutcome::Rejected(reason.clone()), now);
        Some(reason)
    }

    fn expect_state(&self, expected: &AttemptState, event: &'static str) -> Result<(), AttemptError> {
        if self.is_terminal() {
            return Err(AttemptError::AlreadyTerminal(self.id));
        }
        if &self.state != expected {
            return Err(AttemptError::InvalidTransition {
                attempt: self.id,
                state: self.state.name(),
                event,
            });
        }
        Ok(())
    }

    fn finish(&mut self, outcome: AttemptOutcome, now: I) {
        self.state = outcome.into_state();
        self.completed_at = Some(now);

        tracing::debug!(
            attempt = %self.id,
            participant = %self.participant,
            state = self.state.name(),
            "attempt finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn attempt(now: Instant) -> VerificationAttempt<Instant> {
        VerificationAttempt::new(
            AttemptId::new(1),
            ParticipantId::new("s-1"),
            OtpCode::new(8547).unwrap(),
            Epoch { index: 0, issued_at: now },
            now,
        )
    }

    fn sample() -> SampleRef {
        SampleRef { len: 64, media_type: None }
    }

    #[test]
    fn happy_path_reaches_accepted() {
        let t0 = Instant::now();
        let timeouts = AttemptTimeouts::default();
        let mut attempt = attempt(t0);

        attempt.submit_capture(sample(), t0 + Duration::from_secs(1), timeouts).unwrap();
        assert_eq!(attempt.state(), &AttemptState::CaptureSubmitted);

        attempt.begin_verification().unwrap();
        attempt
            .complete(AttemptOutcome::Accepted { confidence: 0.93 }, t0 + Duration::from_secs(4))
            .unwrap();

        assert_eq!(attempt.state(), &AttemptState::Accepted { confidence: 0.93 });
        assert_eq!(attempt.completed_at(), Some(t0 + Duration::from_secs(4)));
        assert_eq!(attempt.sample().map(|s| s.len), Some(64));
    }

    #[test]
    fn late_capture_rejects_with_timeout() {
        let t0 = Instant::now();
        let timeouts = AttemptTimeouts::default();
        let mut attempt = attempt(t0);

        let result = attempt.submit_capture(sample(), t0 + timeouts.capture, timeouts);
        assert_eq!(result, Err(AttemptError::CaptureTimeout(AttemptId::new(1))));
        assert_eq!(attempt.state(), &AttemptState::Rejected { reason: RejectionReason::Timeout });
    }

    #[test]
    fn terminal_state_refuses_everything() {
        let t0 = Instant::now();
        let timeouts = AttemptTimeouts::default();
        let mut attempt = attempt(t0);
        attempt.reject(RejectionReason::SessionClosed, t0).unwrap();

        let id = AttemptId::new(1);
        assert_eq!(
            attempt.submit_capture(sample(), t0, timeouts),
            Err(AttemptError::AlreadyTerminal(id))
        );
        assert_eq!(attempt.begin_verification(), Err(AttemptError::AlreadyTerminal(id)));
        assert_eq!(
            attempt.complete(AttemptOutcome::Accepted { confidence: 1.0 }, t0),
            Err(AttemptError::AlreadyTerminal(id))
        );
        assert_eq!(
            attempt.reject(RejectionReason::Timeout, t0),
            Err(AttemptError::AlreadyTerminal(id))
        );
        assert_eq!(attempt.expire(t0 + Duration::from_secs(3600), timeouts), None);
        assert_eq!(
            attempt.state(),
            &AttemptState::Rejected { reason: RejectionReason::SessionClosed }
        );
    }

    #[test]
    fn complete_requires_verifying() {
        let t0 = Instant::now();
        let mut attempt = attempt(t0);

        let result = attempt.complete(AttemptOutcome::Accepted { confidence: 0.9 }, t0);
        assert!(matches!(result, Err(AttemptError::InvalidTransition { state: "awaiting capture", .. })));
        assert!(!attempt.is_terminal());
    }

    #[test]
    fn cancel_withdraws_attempt_awaiting_capture() {
        let t0 = Instant::now();
        let mut attempt = attempt(t0);

        attempt.cancel(t0 + Duration::from_secs(2)).unwrap();

        assert_eq!(attempt.state(), &AttemptState::Rejected { reason: RejectionReason::Cancelled });
        assert_eq!(attempt.completed_at(), Some(t0 + Duration::from_secs(2)));
        assert_eq!(attempt.cancel(t0), Err(AttemptError::AlreadyTerminal(AttemptId::new(1))));
    }

    #[test]
    fn cancel_refused_once_verifying() {
        let t0 = Instant::now();
        let timeouts = AttemptTimeouts::default();
        let mut attempt = attempt(t0);
        attempt.submit_capture(sample(), t0, timeouts).unwrap();
        attempt.begin_verification().unwrap();

        let result = attempt.cancel(t0);
        assert!(matches!(
            result,
            Err(AttemptError::InvalidTransition { state: "verifying", event: "cancel", .. })
        ));
        assert_eq!(attempt.state(), &AttemptState::Verifying);
    }

    #[test]
    fn expire_times_out_missing_capture_once() {
        let t0 = Instant::now();
        let timeouts = AttemptTimeouts::default();
        let mut attempt = attempt(t0);

        assert_eq!(attempt.expire(t0 + Duration::from_secs(59), timeouts), None);
        assert_eq!(attempt.expire(t0 + Duration::from_secs(60), timeouts), Some(RejectionReason::Timeout));
        assert_eq!(attempt.expire(t0 + Duration::from_secs(61), timeouts), None);
    }

    #[test]
    fn expire_gives_up_on_silent_verifier() {
        let t0 = Instant::now();
        let timeouts = AttemptTimeouts::default();
        let mut attempt = attempt(t0);
        let captured = t0 + Duration::from_secs(5);

        attempt.submit_capture(sample(), captured, timeouts).unwrap();
        attempt.begin_verification().unwrap();

        assert_eq!(attempt.expire(captured + Duration::from_secs(9), timeouts), None);
        assert_eq!(
            attempt.expire(captured + timeouts.verifier, timeouts),
            Some(RejectionReason::VerifierUnavailable)
        );
    }

    #[test]
    fn verifier_reply_mapping() {
        assert_eq!(
            AttemptOutcome::from_verifier(Ok(Verdict::Accept { confidence: 0.8 })),
            AttemptOutcome::Accepted { confidence: 0.8 }
        );
        assert_eq!(
            AttemptOutcome::from_verifier(Ok(Verdict::Reject { reason: "no match".to_string() })),
            AttemptOutcome::Rejected(RejectionReason::VerifierRejected {
                detail: "no match".to_string()
            })
        );
        assert_eq!(
            AttemptOutcome::from_verifier(Err(VerifierError::Unavailable("503".to_string()))),
            AttemptOutcome::Rejected(RejectionReason::VerifierUnavailable)
        );
    }
}
