//! Session error types.
//!
//! Nothing here is fatal to a session. Each error maps onto one participant
//! response and says whether the participant can fix it by retrying.

use rollcall_proto::ParticipantResponse;
use thiserror::Error;

use crate::{attempt::AttemptId, participant::ParticipantId};

/// Errors from submitting a code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    /// Code matches neither the current nor the grace epoch.
    #[error("code does not match the current code")]
    CodeMismatch,

    /// Code is not four ASCII digits.
    #[error("malformed code: expected 4 digits")]
    MalformedCode,

    /// Participant already has a non-terminal attempt.
    #[error("participant {participant} already has live attempt {attempt}")]
    DuplicateAttempt {
        /// Participant who submitted.
        participant: ParticipantId,
        /// Their live attempt.
        attempt: AttemptId,
    },

    /// Participant's attendance was already accepted in this session.
    #[error("participant {0} is already marked present")]
    AlreadyPresent(ParticipantId),

    /// Session has been closed by the presenter.
    #[error("session closed")]
    SessionClosed,
}

impl SubmissionError {
    /// Returns true if the participant may retry the submission.
    ///
    /// A mismatched or mistyped code is retried with a fresh code; a duplicate
    /// is resolved by polling the existing attempt.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::CodeMismatch | Self::MalformedCode | Self::DuplicateAttempt { .. } => true,
            Self::AlreadyPresent(_) | Self::SessionClosed => false,
        }
    }

    /// Response surfaced to the participant.
    pub fn to_response(&self) -> ParticipantResponse {
        match self {
            Self::CodeMismatch => ParticipantResponse::CodeMismatch,
            Self::MalformedCode => ParticipantResponse::MalformedCode,
            Self::DuplicateAttempt { attempt, .. } => {
                ParticipantResponse::DuplicateAttempt { attempt_id: attempt.value() }
            },
            Self::AlreadyPresent(_) => ParticipantResponse::AlreadyPresent,
            Self::SessionClosed => ParticipantResponse::SessionClosed,
        }
    }
}

/// Errors from driving an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    /// Attempt already reached `Accepted` or `Rejected`.
    #[error("attempt {0} is already terminal")]
    AlreadyTerminal(AttemptId),

    /// Capture arrived after the capture deadline. The attempt is now
    /// `Rejected` with reason `Timeout`.
    #[error("capture for attempt {0} arrived after the deadline")]
    CaptureTimeout(AttemptId),

    /// Event is not valid in the attempt's current state.
    #[error("attempt {attempt}: cannot {event} while {state}")]
    InvalidTransition {
        /// Attempt the event targeted.
        attempt: AttemptId,
        /// State name at the time.
        state: &'static str,
        /// Event that was refused.
        event: &'static str,
    },

    /// No attempt with this handle exists in the session.
    #[error("unknown attempt {0}")]
    UnknownAttempt(AttemptId),

    /// Session has been closed by the presenter.
    #[error("session closed")]
    SessionClosed,
}

impl AttemptError {
    /// Returns true if retrying the same request can succeed.
    ///
    /// Never true: a timed-out attempt is recovered by starting a new one,
    /// and the rest indicate a client-side race or bug.
    pub fn is_recoverable(&self) -> bool {
        false
    }

    /// Response surfaced to the participant.
    pub fn to_response(&self) -> ParticipantResponse {
        match self {
            Self::AlreadyTerminal(attempt) => {
                ParticipantResponse::AlreadyTerminal { attempt_id: attempt.value() }
            },
            Self::InvalidTransition { attempt, state, .. } => {
                ParticipantResponse::InvalidTransition {
                    attempt_id: attempt.value(),
                    state: (*state).to_string(),
                }
            },
            Self::CaptureTimeout(attempt) => ParticipantResponse::Rejected {
                attempt_id: attempt.value(),
                reason: rollcall_proto::RejectionReason::Timeout,
            },
            Self::UnknownAttempt(attempt) => {
                ParticipantResponse::UnknownAttempt { attempt_id: attempt.value() }
            },
            Self::SessionClosed => ParticipantResponse::SessionClosed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_mismatch_is_recoverable() {
        assert!(SubmissionError::CodeMismatch.is_recoverable());
        assert_eq!(SubmissionError::CodeMismatch.to_response(), ParticipantResponse::CodeMismatch);
    }

    #[test]
    fn session_closed_is_not_recoverable() {
        assert!(!SubmissionError::SessionClosed.is_recoverable());
        assert!(!AttemptError::SessionClosed.is_recoverable());
    }

    #[test]
    fn duplicate_attempt_points_at_live_attempt() {
        let err = SubmissionError::DuplicateAttempt {
            participant: ParticipantId::new("s-7"),
            attempt: AttemptId::new(3),
        };

        assert_eq!(err.to_response(), ParticipantResponse::DuplicateAttempt { attempt_id: 3 });
        insta::assert_snapshot!(err.to_string(), @"participant s-7 already has live attempt #3");
    }

    #[test]
    fn capture_timeout_surfaces_as_rejection() {
        let response = AttemptError::CaptureTimeout(AttemptId::new(9)).to_response();
        assert!(response.is_terminal());
    }

    #[test]
    fn invalid_transition_display() {
        let err = AttemptError::InvalidTransition {
            attempt: AttemptId::new(1),
            state: "verifying",
            event: "submit capture",
        };
        insta::assert_snapshot!(err.to_string(), @"attempt #1: cannot submit capture while verifying");
    }

    #[test]
    fn invalid_transition_leaves_attempt_live() {
        let err = AttemptError::InvalidTransition {
            attempt: AttemptId::new(4),
            state: "verifying",
            event: "submit capture",
        };

        let response = err.to_response();
        assert_eq!(
            response,
            ParticipantResponse::InvalidTransition { attempt_id: 4, state: "verifying".to_string() }
        );
        assert!(!response.is_terminal());
    }
}
