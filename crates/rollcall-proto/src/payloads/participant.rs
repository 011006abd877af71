//! Participant surface payloads.
//!
//! A participant claims attendance in two steps: [`SubmitCode`] with the code
//! read off the presenter display, then [`ProvideCapture`] with the biometric
//! sample for the attempt the server created. A participant who backs out of
//! the camera sends [`ParticipantRequest::CancelAttempt`] instead. Every
//! request is answered with a [`ParticipantResponse`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Requests a participant surface may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantRequest {
    /// Submit the code currently shown by the presenter.
    SubmitCode(SubmitCode),
    /// Attach a captured sample to an open attempt.
    ProvideCapture(ProvideCapture),
    /// Ask for the current state of an attempt.
    PollAttempt {
        /// Attempt to query.
        attempt_id: u64,
    },
    /// Withdraw an attempt that is still waiting for its capture.
    CancelAttempt {
        /// Attempt to withdraw.
        attempt_id: u64,
    },
}

/// Code submission
///
/// The code is carried as the raw string the participant typed; the session
/// decides whether it is well formed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitCode {
    /// Stable identifier of the participant (student number, account ID, ...).
    pub participant_id: String,
    /// Code as entered, expected to be four ASCII digits.
    pub code: String,
}

/// Capture upload
///
/// # Security
///
/// - **Debug Redaction**: The `Debug` impl prints only the sample length so
///   biometric data never reaches the logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvideCapture {
    /// Attempt returned by [`ParticipantResponse::AttemptCreated`].
    pub attempt_id: u64,
    /// MIME type of the sample (e.g. `image/jpeg`), if known.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub media_type: Option<String>,
    /// Opaque sample bytes.
    pub sample: Bytes,
}

impl std::fmt::Debug for ProvideCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvideCapture")
            .field("attempt_id", &self.attempt_id)
            .field("media_type", &self.media_type)
            .field("sample", &format!("<redacted {} bytes>", self.sample.len()))
            .finish()
    }
}

/// Why an attempt ended in `Rejected`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionReason {
    /// No capture arrived before the capture deadline.
    Timeout,
    /// The verifier looked at the sample and said no.
    VerifierRejected {
        /// Verifier-supplied explanation.
        detail: String,
    },
    /// The verifier failed or did not answer in time.
    VerifierUnavailable,
    /// The presenter ended the session first.
    SessionClosed,
    /// The participant withdrew before providing a capture.
    Cancelled,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "capture timed out"),
            Self::VerifierRejected { detail } => write!(f, "verification rejected: {detail}"),
            Self::VerifierUnavailable => write!(f, "verifier unavailable"),
            Self::SessionClosed => write!(f, "session closed"),
            Self::Cancelled => write!(f, "cancelled by participant"),
        }
    }
}

/// Responses surfaced to the participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParticipantResponse {
    /// Code accepted; capture is now expected for this attempt.
    AttemptCreated {
        /// Handle for subsequent requests.
        attempt_id: u64,
        /// Code epoch the attempt is bound to.
        epoch: u64,
    },
    /// Attempt is still in flight.
    Pending {
        /// Attempt being processed.
        attempt_id: u64,
    },
    /// Attendance recorded.
    Accepted {
        /// Attempt that was accepted.
        attempt_id: u64,
        /// Verifier confidence in `[0, 1]`.
        confidence: f32,
    },
    /// Attempt ended without recording attendance.
    Rejected {
        /// Attempt that was rejected.
        attempt_id: u64,
        /// Why it was rejected.
        reason: RejectionReason,
    },
    /// Code matches neither the current nor the grace epoch. Retry with a
    /// fresh code.
    CodeMismatch,
    /// Code is not four ASCII digits.
    MalformedCode,
    /// Participant already has a live attempt; poll it instead.
    DuplicateAttempt {
        /// The live attempt.
        attempt_id: u64,
    },
    /// Participant's attendance is already recorded in this session.
    AlreadyPresent,
    /// The attempt has already reached a terminal state.
    AlreadyTerminal {
        /// The terminal attempt.
        attempt_id: u64,
    },
    /// The request does not fit the attempt's current state, e.g. a second
    /// capture while the first is being verified. The attempt is unaffected.
    InvalidTransition {
        /// The attempt the request targeted.
        attempt_id: u64,
        /// State the attempt is in.
        state: String,
    },
    /// No attempt with this handle exists in the session.
    UnknownAttempt {
        /// The handle that was not found.
        attempt_id: u64,
    },
    /// Session is no longer accepting requests.
    SessionClosed,
}

impl ParticipantResponse {
    /// Returns true if the attempt this response describes is finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted { .. } | Self::Rejected { .. } | Self::AlreadyTerminal { .. })
    }
}
