//! Fuzz target for [`Session`] state machine
//!
//! Prevent attendance being recorded without a valid code and a verifier
//! accept, and prevent attempts that never finish.
//!
//! # Strategy
//!
//! - Event sequences: Arbitrary submissions, captures, cancellations,
//!   verifier outcomes, ticks and close
//! - Code probing: Current, previous, random and malformed codes
//! - Timeout testing: Advance time to trigger capture and verifier deadlines
//! - Late replies: Outcomes for attempts already rejected by deadline/close
//!
//! # Invariants
//!
//! - Accepted count only grows, and only via an accepted verifier outcome
//! - No transition out of `Accepted` or `Rejected` (terminal invariant)
//! - Epoch index never decreases
//! - Pending count equals the number of non-terminal attempts
//! - Nothing is pending once the session is closed
//! - NEVER panic on unexpected input

#![no_main]

use std::{collections::HashMap, ops::Sub, time::Duration};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rand::{rngs::StdRng, SeedableRng};
use rollcall_core::{
    AttemptId, AttemptOutcome, AttemptState, AttemptTimeouts, CaptureSample, GracePolicy,
    ParticipantId, RejectionReason, Session, SessionConfig, SessionId,
};

/// Represents time as Duration since epoch 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct FuzzInstant(Duration);

impl Sub for FuzzInstant {
    type Output = Duration;

    fn sub(self, other: Self) -> Duration {
        self.0.saturating_sub(other.0)
    }
}

#[derive(Debug, Clone, Arbitrary)]
enum FuzzedCode {
    Current,
    Previous,
    Digits(u16),
    Raw(String),
}

#[derive(Debug, Clone, Arbitrary)]
enum SessionEvent {
    Submit { participant: u8, code: FuzzedCode },
    Capture { participant: u8, len: u8 },
    Cancel { participant: u8 },
    Outcome { participant: u8, accept: bool },
    ForeignAttempt { id: u64 },
    Tick { advance_ms: u16 },
    Close,
}

/// Fuzz input with deterministic seeds.
#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    /// Seed for the code generator.
    seed: u64,
    /// Grace window in milliseconds.
    grace_ms: u16,
    /// Event sequence to process.
    events: Vec<SessionEvent>,
}

fuzz_target!(|input: FuzzInput| {
    let config = SessionConfig {
        cadence: Duration::from_secs(2),
        grace: GracePolicy::new(Duration::from_millis(u64::from(input.grace_ms))),
        timeouts: AttemptTimeouts {
            capture: Duration::from_secs(5),
            verifier: Duration::from_secs(3),
        },
    };

    let mut now = FuzzInstant(Duration::ZERO);
    let rng = StdRng::seed_from_u64(input.seed);
    let mut session = Session::open(SessionId(1), "fuzz", config, rng, now);
    let mut latest: HashMap<u8, AttemptId> = HashMap::new();
    let mut accepted = 0;
    let mut epoch = 0;

    for event in input.events {
        let before: HashMap<AttemptId, AttemptState> =
            session.attempts().map(|a| (a.id(), a.state().clone())).collect();
        let was_open = session.is_open();
        let mut accepted_outcome = false;

        match event {
            SessionEvent::Submit { participant, code } => {
                let typed = match code {
                    FuzzedCode::Current => session.current_code().value.to_string(),
                    FuzzedCode::Previous => session
                        .previous_code()
                        .map_or_else(|| "0000".to_string(), |c| c.value.to_string()),
                    FuzzedCode::Digits(n) => format!("{n:04}"),
                    FuzzedCode::Raw(s) => s,
                };
                let who = ParticipantId::new(format!("p{}", participant % 8));
                if let Ok(id) = session.submit_code(who, &typed, now) {
                    assert!(was_open, "attempt created on closed session");
                    assert_eq!(session.attempt(id).map(|a| a.state()), Some(&AttemptState::AwaitingCapture));
                    latest.insert(participant % 8, id);
                }
            },

            SessionEvent::Capture { participant, len } => {
                let id = latest.get(&(participant % 8)).copied().unwrap_or(AttemptId::new(0));
                let sample = CaptureSample::new(vec![0xAB; usize::from(len)]);
                if let Ok(request) = session.provide_capture(id, sample, now) {
                    assert_eq!(request.attempt, id);
                    assert_eq!(session.attempt(id).map(|a| a.state()), Some(&AttemptState::Verifying));
                }
            },

            SessionEvent::Cancel { participant } => {
                let id = latest.get(&(participant % 8)).copied().unwrap_or(AttemptId::new(0));
                let was_awaiting = before.get(&id) == Some(&AttemptState::AwaitingCapture);
                let cancelled = session.cancel_attempt(id, now).is_ok();
                assert_eq!(cancelled, was_awaiting && was_open, "cancel outside capture step");
                if cancelled {
                    assert_eq!(
                        session.attempt(id).map(|a| a.state()),
                        Some(&AttemptState::Rejected { reason: RejectionReason::Cancelled })
                    );
                    let who = ParticipantId::new(format!("p{}", participant % 8));
                    assert!(session.live_attempt(&who).is_none());
                }
            },

            SessionEvent::Outcome { participant, accept } => {
                let id = latest.get(&(participant % 8)).copied().unwrap_or(AttemptId::new(0));
                let outcome = if accept {
                    AttemptOutcome::Accepted { confidence: 0.9 }
                } else {
                    AttemptOutcome::Rejected(RejectionReason::VerifierRejected {
                        detail: "fuzz".to_string(),
                    })
                };
                accepted_outcome = session.record_outcome(id, outcome, now).is_ok() && accept;
            },

            SessionEvent::ForeignAttempt { id } => {
                let id = AttemptId::new(id);
                if session.attempt(id).is_none() {
                    assert!(session.provide_capture(id, CaptureSample::new(vec![1]), now).is_err());
                    assert!(session
                        .record_outcome(id, AttemptOutcome::Accepted { confidence: 1.0 }, now)
                        .is_err());
                }
            },

            SessionEvent::Tick { advance_ms } => {
                now = FuzzInstant(now.0 + Duration::from_millis(u64::from(advance_ms)));
                let _ = session.tick(now);
            },

            SessionEvent::Close => {
                let _ = session.close(now);
                assert!(!session.is_open());
            },
        }

        // Terminal states never change
        for (id, state) in &before {
            if state.is_terminal() {
                assert_eq!(session.attempt(*id).map(|a| a.state()), Some(state));
            }
        }

        // Accepted count only moves on an accepted outcome
        let now_accepted = session.accepted_count();
        if accepted_outcome {
            assert_eq!(now_accepted, accepted + 1);
        } else {
            assert_eq!(now_accepted, accepted);
        }
        accepted = now_accepted;

        let current_epoch = session.current_code().epoch.index;
        assert!(current_epoch >= epoch, "epoch went backwards");
        epoch = current_epoch;

        let pending = session.attempts().filter(|a| !a.is_terminal()).count();
        assert_eq!(session.pending_attempts(), pending);

        if !session.is_open() {
            assert_eq!(pending, 0, "attempt left pending after close");
        }

        let snapshot = session.snapshot(now);
        assert_eq!(snapshot.current_code.to_string().len(), 4);
    }
});
