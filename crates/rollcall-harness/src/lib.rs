//! Deterministic simulation harness for Rollcall session testing.
//!
//! Virtual-time implementation of the `Environment` trait, verifier test
//! doubles, and a reference model of the attendance session.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation for model-based
//! testing. Operations are applied to both the model and real session, and
//! their observable states are compared after every step.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod model;
pub mod sim_env;
pub mod verifiers;

pub use model::{
    CodeChoice, ModelAttemptState, ModelSession, ObservableState, Operation, OperationError,
    OperationResult, ParticipantSlot,
};
pub use sim_env::{SimEnv, SimInstant};
pub use verifiers::{PendingVerifier, ScriptedVerifier};
