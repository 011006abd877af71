//! Reference model for model-based testing.
//!
//! The model is a deliberately naive re-statement of the attendance rules:
//! plain integers for time, a linear scan for live attempts, no logging. It
//! serves as the oracle against which the real `Session` is verified.
//!
//! # Design Principles
//!
//! - Simplicity: The model should be obviously correct
//! - Rules, not structure: Captures WHAT, not HOW
//! - Deterministic: Same seed, same codes, same outcomes

pub mod operation;
mod session;

pub use operation::{CodeChoice, Operation, OperationError, OperationResult, ParticipantSlot};
pub use session::{ModelAttemptState, ModelSession, ObservableState};
