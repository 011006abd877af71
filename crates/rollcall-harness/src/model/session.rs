//! Model session - the reference implementation.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    time::Duration,
};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rollcall_core::{AttemptState, RejectionReason, SessionConfig};

use super::operation::{
    CodeChoice, Operation, OperationError, OperationResult, ParticipantSlot,
};

/// Attempt state as the model sees it.
///
/// `CaptureSubmitted` is transient in the real session (a capture moves
/// straight on to verifying), so it folds into `Verifying`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelAttemptState {
    /// Waiting for the capture.
    AwaitingCapture,
    /// Verifier running.
    Verifying,
    /// Accepted.
    Accepted,
    /// Rejected.
    Rejected(RejectionReason),
}

impl ModelAttemptState {
    /// Returns true for `Accepted` and `Rejected`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected(_))
    }
}

impl From<&AttemptState> for ModelAttemptState {
    fn from(state: &AttemptState) -> Self {
        match state {
            AttemptState::AwaitingCapture => Self::AwaitingCapture,
            AttemptState::CaptureSubmitted | AttemptState::Verifying => Self::Verifying,
            AttemptState::Accepted { .. } => Self::Accepted,
            AttemptState::Rejected { reason } => Self::Rejected(reason.clone()),
        }
    }
}

/// Observable state for oracle comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Session still open.
    pub open: bool,
    /// Digits on display.
    pub current_code: u16,
    /// Current epoch index.
    pub epoch: u64,
    /// Accepted participants.
    pub accepted: usize,
    /// Attempts ever created.
    pub total: usize,
    /// Attempts not yet terminal.
    pub pending: usize,
    /// Every attempt by handle, ascending.
    pub attempts: Vec<(u64, ModelAttemptState)>,
}

#[derive(Debug, Clone, Copy)]
struct ModelCode {
    value: u16,
    index: u64,
    issued_at: u64,
}

#[derive(Debug, Clone)]
struct ModelAttempt {
    state: ModelAttemptState,
    submitted_at: u64,
    captured_at: u64,
}

/// Reference session. Time is whole milliseconds since open.
#[derive(Debug, Clone)]
pub struct ModelSession {
    rng: ChaCha8Rng,
    cadence: u64,
    grace: u64,
    capture_timeout: u64,
    verifier_timeout: u64,
    now: u64,
    current: ModelCode,
    previous: Option<ModelCode>,
    attempts: BTreeMap<u64, ModelAttempt>,
    latest: HashMap<ParticipantSlot, u64>,
    present: BTreeSet<ParticipantSlot>,
    open: bool,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl ModelSession {
    /// Open a model session drawing codes from a ChaCha8 generator seeded
    /// with `seed`.
    pub fn new(seed: u64, config: &SessionConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let value = rng.gen_range(0..10_000u16);

        Self {
            rng,
            cadence: millis(config.cadence),
            grace: millis(config.grace.window()),
            capture_timeout: millis(config.timeouts.capture),
            verifier_timeout: millis(config.timeouts.verifier),
            now: 0,
            current: ModelCode { value, index: 0, issued_at: 0 },
            previous: None,
            attempts: BTreeMap::new(),
            latest: HashMap::new(),
            present: BTreeSet::new(),
            open: true,
        }
    }

    /// Milliseconds since open.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Digits on display.
    pub fn current_code(&self) -> u16 {
        self.current.value
    }

    /// Digits before the last rotation.
    pub fn previous_code(&self) -> Option<u16> {
        self.previous.map(|c| c.value)
    }

    /// Apply an operation and return the result.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        let result = match *op {
            Operation::SubmitCode { participant, code } => self.submit(participant, code),
            Operation::ProvideCapture { participant } => self.capture(participant),
            Operation::CancelAttempt { participant } => self.cancel(participant),
            Operation::RecordOutcome { participant, accept } => self.outcome(participant, accept),
            Operation::AdvanceTime { millis } => {
                self.now += u64::from(millis);
                Ok(())
            },
            Operation::Tick => {
                self.tick();
                Ok(())
            },
            Operation::Close => {
                self.close();
                Ok(())
            },
        };

        match result {
            Ok(()) => OperationResult::Ok,
            Err(e) => OperationResult::Error(e),
        }
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        ObservableState {
            open: self.open,
            current_code: self.current.value,
            epoch: self.current.index,
            accepted: self.present.len(),
            total: self.attempts.len(),
            pending: self.attempts.values().filter(|a| !a.state.is_terminal()).count(),
            attempts: self.attempts.iter().map(|(id, a)| (*id, a.state.clone())).collect(),
        }
    }

    fn rotate(&mut self) {
        if self.now - self.current.issued_at >= self.cadence {
            let next = ModelCode {
                value: self.rng.gen_range(0..10_000u16),
                index: self.current.index + 1,
                issued_at: self.now,
            };
            self.previous = Some(std::mem::replace(&mut self.current, next));
        }
    }

    fn matches(&self, value: u16) -> bool {
        if value == self.current.value && self.now - self.current.issued_at < self.cadence {
            return true;
        }

        let window = self.grace.min(self.cadence);
        self.previous.is_some_and(|prev| {
            prev.value == value && window > 0 && self.now - prev.issued_at < self.cadence + window
        })
    }

    fn live(&self, participant: ParticipantSlot) -> bool {
        self.latest
            .get(&participant)
            .and_then(|id| self.attempts.get(id))
            .is_some_and(|a| !a.state.is_terminal())
    }

    fn submit(&mut self, participant: ParticipantSlot, code: CodeChoice) -> Result<(), OperationError> {
        if !self.open {
            return Err(OperationError::SessionClosed);
        }
        let typed = code.resolve(self.current.value, self.previous_code());
        self.rotate();

        let value = parse(&typed).ok_or(OperationError::MalformedCode)?;
        if self.live(participant) {
            return Err(OperationError::DuplicateAttempt);
        }
        if self.present.contains(&participant) {
            return Err(OperationError::AlreadyPresent);
        }
        if !self.matches(value) {
            return Err(OperationError::CodeMismatch);
        }

        let id = self.attempts.len() as u64 + 1;
        self.attempts.insert(id, ModelAttempt {
            state: ModelAttemptState::AwaitingCapture,
            submitted_at: self.now,
            captured_at: self.now,
        });
        self.latest.insert(participant, id);
        Ok(())
    }

    fn capture(&mut self, participant: ParticipantSlot) -> Result<(), OperationError> {
        let now = self.now;
        let capture_timeout = self.capture_timeout;
        let attempt = self
            .latest
            .get(&participant)
            .and_then(|id| self.attempts.get_mut(id))
            .ok_or(OperationError::UnknownAttempt)?;

        match attempt.state {
            ModelAttemptState::Accepted | ModelAttemptState::Rejected(_) => {
                Err(OperationError::AlreadyTerminal)
            },
            ModelAttemptState::Verifying => Err(OperationError::InvalidTransition),
            ModelAttemptState::AwaitingCapture if now - attempt.submitted_at >= capture_timeout => {
                attempt.state = ModelAttemptState::Rejected(RejectionReason::Timeout);
                Err(OperationError::CaptureTimeout)
            },
            ModelAttemptState::AwaitingCapture => {
                attempt.state = ModelAttemptState::Verifying;
                attempt.captured_at = now;
                Ok(())
            },
        }
    }

    fn cancel(&mut self, participant: ParticipantSlot) -> Result<(), OperationError> {
        let attempt = self
            .latest
            .get(&participant)
            .and_then(|id| self.attempts.get_mut(id))
            .ok_or(OperationError::UnknownAttempt)?;

        match attempt.state {
            ModelAttemptState::Accepted | ModelAttemptState::Rejected(_) => {
                Err(OperationError::AlreadyTerminal)
            },
            ModelAttemptState::Verifying => Err(OperationError::InvalidTransition),
            ModelAttemptState::AwaitingCapture => {
                attempt.state = ModelAttemptState::Rejected(RejectionReason::Cancelled);
                Ok(())
            },
        }
    }

    fn outcome(&mut self, participant: ParticipantSlot, accept: bool) -> Result<(), OperationError> {
        let attempt = self
            .latest
            .get(&participant)
            .and_then(|id| self.attempts.get_mut(id))
            .ok_or(OperationError::UnknownAttempt)?;

        match attempt.state {
            ModelAttemptState::Accepted | ModelAttemptState::Rejected(_) => {
                Err(OperationError::AlreadyTerminal)
            },
            ModelAttemptState::AwaitingCapture => Err(OperationError::InvalidTransition),
            ModelAttemptState::Verifying if accept => {
                attempt.state = ModelAttemptState::Accepted;
                self.present.insert(participant);
                Ok(())
            },
            ModelAttemptState::Verifying => {
                attempt.state = ModelAttemptState::Rejected(RejectionReason::VerifierRejected {
                    detail: "no match".to_string(),
                });
                Ok(())
            },
        }
    }

    fn tick(&mut self) {
        if !self.open {
            return;
        }
        self.rotate();

        for attempt in self.attempts.values_mut() {
            match attempt.state {
                ModelAttemptState::AwaitingCapture
                    if self.now - attempt.submitted_at >= self.capture_timeout =>
                {
                    attempt.state = ModelAttemptState::Rejected(RejectionReason::Timeout);
                },
                ModelAttemptState::Verifying
                    if self.now - attempt.captured_at >= self.verifier_timeout =>
                {
                    attempt.state = ModelAttemptState::Rejected(RejectionReason::VerifierUnavailable);
                },
                _ => {},
            }
        }
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        for attempt in self.attempts.values_mut() {
            if !attempt.state.is_terminal() {
                attempt.state = ModelAttemptState::Rejected(RejectionReason::SessionClosed);
            }
        }
    }
}

/// Four ASCII digits, nothing else.
fn parse(typed: &str) -> Option<u16> {
    if typed.len() == 4 && typed.bytes().all(|b| b.is_ascii_digit()) {
        typed.parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ModelSession {
        ModelSession::new(1, &SessionConfig::default())
    }

    #[test]
    fn full_happy_path() {
        let mut model = model();

        let ops = [
            Operation::SubmitCode { participant: 0, code: CodeChoice::Current },
            Operation::ProvideCapture { participant: 0 },
            Operation::RecordOutcome { participant: 0, accept: true },
        ];
        for op in &ops {
            assert!(model.apply(op).is_ok(), "{op:?}");
        }

        let state = model.observable_state();
        assert_eq!(state.accepted, 1);
        assert_eq!(state.pending, 0);
        assert_eq!(state.attempts, vec![(1, ModelAttemptState::Accepted)]);
    }

    #[test]
    fn cancel_lets_participant_start_over() {
        let mut model = model();

        model.apply(&Operation::SubmitCode { participant: 0, code: CodeChoice::Current });
        assert!(model.apply(&Operation::CancelAttempt { participant: 0 }).is_ok());
        assert_eq!(
            model.apply(&Operation::CancelAttempt { participant: 0 }),
            OperationResult::Error(OperationError::AlreadyTerminal)
        );
        assert!(
            model.apply(&Operation::SubmitCode { participant: 0, code: CodeChoice::Current }).is_ok()
        );

        let state = model.observable_state();
        assert_eq!(state.attempts[0], (1, ModelAttemptState::Rejected(RejectionReason::Cancelled)));
        assert_eq!(state.pending, 1);
    }

    #[test]
    fn close_rejects_pending() {
        let mut model = model();
        model.apply(&Operation::SubmitCode { participant: 0, code: CodeChoice::Current });
        model.apply(&Operation::SubmitCode { participant: 1, code: CodeChoice::Current });
        model.apply(&Operation::Close);

        let state = model.observable_state();
        assert!(!state.open);
        assert!(
            state
                .attempts
                .iter()
                .all(|(_, s)| *s == ModelAttemptState::Rejected(RejectionReason::SessionClosed))
        );
        assert_eq!(
            model.apply(&Operation::SubmitCode { participant: 2, code: CodeChoice::Current }),
            OperationResult::Error(OperationError::SessionClosed)
        );
    }
}
