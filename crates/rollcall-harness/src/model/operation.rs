//! Operations for model-based testing.
//!
//! Operations represent everything a presenter, participant or verifier can
//! do to a session. They are generated randomly and applied to both the
//! model and the real session.

use arbitrary::Arbitrary;
use rollcall_core::{AttemptError, SubmissionError};

/// Participant index (kept small so participants collide often).
pub type ParticipantSlot = u8;

/// Which code a participant types.
///
/// Resolved against the code on display *before* the operation runs, so a
/// slow typist can race a rotation exactly as in the real world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum CodeChoice {
    /// The code on display.
    Current,
    /// The code before the last rotation (or the current one if there is
    /// none yet).
    Previous,
    /// A well-formed code unrelated to the display.
    Other,
    /// Not four digits.
    Malformed,
}

impl CodeChoice {
    /// Digits the participant types.
    pub fn resolve(self, current: u16, previous: Option<u16>) -> String {
        match self {
            Self::Current => format!("{current:04}"),
            Self::Previous => format!("{:04}", previous.unwrap_or(current)),
            Self::Other => format!("{:04}", (current + 5000) % 10_000),
            Self::Malformed => "12a4".to_string(),
        }
    }
}

/// Operations that can be applied to a session.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Participant submits a code.
    SubmitCode {
        /// Who submits.
        participant: ParticipantSlot,
        /// What they type.
        code: CodeChoice,
    },

    /// Participant provides a capture for their most recent attempt.
    ProvideCapture {
        /// Who captures.
        participant: ParticipantSlot,
    },

    /// Participant backs out of the capture step of their most recent attempt.
    CancelAttempt {
        /// Who cancels.
        participant: ParticipantSlot,
    },

    /// Verifier answers for the participant's most recent attempt.
    RecordOutcome {
        /// Whose attempt.
        participant: ParticipantSlot,
        /// Accept or reject.
        accept: bool,
    },

    /// Advance simulation time.
    AdvanceTime {
        /// Milliseconds to advance.
        millis: u16,
    },

    /// Periodic driver tick: rotation and deadlines.
    Tick,

    /// Presenter ends the session.
    Close,
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation succeeded.
    Ok,

    /// Operation failed with expected error.
    Error(OperationError),
}

impl OperationResult {
    /// Check if operation succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Check if operation failed.
    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }
}

/// Error kinds, without payloads, for comparing model and real session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// Session closed.
    SessionClosed,
    /// Code not four digits.
    MalformedCode,
    /// Participant already has a live attempt.
    DuplicateAttempt,
    /// Participant already accepted.
    AlreadyPresent,
    /// Code matches neither current nor grace epoch.
    CodeMismatch,
    /// Attempt handle never issued.
    UnknownAttempt,
    /// Attempt already finished.
    AlreadyTerminal,
    /// Capture arrived after its deadline.
    CaptureTimeout,
    /// Event not valid in the attempt's state.
    InvalidTransition,
}

impl From<&SubmissionError> for OperationError {
    fn from(err: &SubmissionError) -> Self {
        match err {
            SubmissionError::CodeMismatch => Self::CodeMismatch,
            SubmissionError::MalformedCode => Self::MalformedCode,
            SubmissionError::DuplicateAttempt { .. } => Self::DuplicateAttempt,
            SubmissionError::AlreadyPresent(_) => Self::AlreadyPresent,
            SubmissionError::SessionClosed => Self::SessionClosed,
        }
    }
}

impl From<&AttemptError> for OperationError {
    fn from(err: &AttemptError) -> Self {
        match err {
            AttemptError::AlreadyTerminal(_) => Self::AlreadyTerminal,
            AttemptError::CaptureTimeout(_) => Self::CaptureTimeout,
            AttemptError::InvalidTransition { .. } => Self::InvalidTransition,
            AttemptError::UnknownAttempt(_) => Self::UnknownAttempt,
            AttemptError::SessionClosed => Self::SessionClosed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_pads_and_avoids_display() {
        assert_eq!(CodeChoice::Current.resolve(42, None), "0042");
        assert_eq!(CodeChoice::Previous.resolve(42, None), "0042");
        assert_eq!(CodeChoice::Previous.resolve(42, Some(7)), "0007");
        assert_eq!(CodeChoice::Other.resolve(9999, None), "4999");
        assert!(CodeChoice::Malformed.resolve(0, None).parse::<u16>().is_err());
    }
}
