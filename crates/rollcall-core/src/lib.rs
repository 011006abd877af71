//! Rollcall protocol core logic
//!
//! Pure state machines for time-boxed attendance verification: a rotating
//! short-lived code shown by the presenter, and per-participant verification
//! attempts that bind to a code epoch and end in accept or reject.
//!
//! # Architecture
//!
//! ```text
//!      ┌──────────────────────────────┐
//!      │ rollcall-core                │
//!      │ - CodeRotator                │
//!      │ - Session                    │
//!      │ - VerificationAttempt        │
//!      │ - VerifierAdapter (boundary) │
//!      └──────────────────────────────┘
//!         ↓                      ↓
//! ┌──────────────────┐  ┌──────────────────┐
//! │ rollcall-harness │  │ rollcall-server  │
//! │ - Virtual time   │  │ - Tokio clock    │
//! │ - Seeded RNG     │  │ - OS entropy     │
//! │ - Model checks   │  │ - Tick driver    │
//! └──────────────────┘  └──────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - No I/O in Core: never read the clock, spawn, or sleep; every operation
//!   takes `now`
//! - Environment Trait: drivers source time and randomness from
//!   [`env::Environment`]
//! - Deterministic: same inputs and seed, same outputs
//!
//! # Modules
//!
//! - [`code`]: Code values, epochs, rotation, grace policy
//! - [`attempt`]: Verification attempt state machine
//! - [`session`]: Attendance session (rotation + attempt registry)
//! - [`verifier`]: Biometric verifier boundary
//! - [`env`]: Environment abstraction (time, RNG)
//! - [`error`]: Submission and attempt errors

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod attempt;
pub mod code;
pub mod env;
pub mod error;
pub mod participant;
pub mod session;
pub mod verifier;

pub use attempt::{AttemptId, AttemptOutcome, AttemptState, AttemptTimeouts, VerificationAttempt};
pub use code::{Code, CodeRotator, Epoch, GracePolicy, OtpCode};
pub use env::{Environment, Timestamp};
pub use error::{AttemptError, SubmissionError};
pub use participant::ParticipantId;
pub use rollcall_proto::RejectionReason;
pub use session::{
    Session, SessionAction, SessionConfig, SessionId, SessionSnapshot, VerificationRequest,
};
pub use verifier::{CaptureSample, SampleRef, SessionContext, Verdict, VerifierAdapter, VerifierError};
