//! Rotating attendance code.
//!
//! The presenter display shows a short numeric code that changes on a fixed
//! cadence. Only people in the room can read it, so a correct submission is
//! evidence of presence at submission time.
//!
//! ## Epochs
//!
//! Every issued code opens a new [`Epoch`]. The rotator keeps the current
//! epoch plus at most one previous epoch, which a [`GracePolicy`] may still
//! honour for a bounded window after rotation. This makes a submission that
//! races a rotation well defined instead of a coin toss.

use std::{fmt, str::FromStr, time::Duration};

use rand::Rng;

use crate::env::Timestamp;

/// Number of digits in a code.
pub const CODE_DIGITS: usize = 4;

/// Size of the code space (`10^CODE_DIGITS`).
const CODE_SPACE: u16 = 10_000;

/// Default lifetime of a single code.
pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(2);

/// A four-digit code value. Leading zeros are significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OtpCode(u16);

impl OtpCode {
    /// Create a code from its numeric value.
    ///
    /// Returns `None` if `value` has more than [`CODE_DIGITS`] digits.
    pub fn new(value: u16) -> Option<Self> {
        (value < CODE_SPACE).then_some(Self(value))
    }

    /// Draw a code uniformly from the whole code space.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.gen_range(0..CODE_SPACE))
    }

    /// Numeric value of the code.
    pub fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Display for OtpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// Input is not exactly [`CODE_DIGITS`] ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {CODE_DIGITS} ASCII digits, got {len} characters")]
pub struct ParseCodeError {
    /// Length of the rejected input, in characters.
    pub len: usize,
}

impl FromStr for OtpCode {
    type Err = ParseCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseCodeError { len: s.chars().count() };

        if s.len() != CODE_DIGITS || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err());
        }

        s.parse::<u16>().ok().and_then(Self::new).ok_or_else(err)
    }
}

/// One rotation interval, identified by its issuance time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Epoch<I> {
    /// Rotation counter, starting at 0 when the session opens.
    pub index: u64,
    /// When the code for this epoch was issued.
    pub issued_at: I,
}

/// A code together with the epoch it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code<I> {
    /// The digits shown on the presenter display.
    pub value: OtpCode,
    /// Epoch this code opened.
    pub epoch: Epoch<I>,
    /// How long the code stays current.
    pub validity: Duration,
}

impl<I: Timestamp> Code<I> {
    /// Time elapsed since issuance.
    pub fn age(&self, now: I) -> Duration {
        now - self.epoch.issued_at
    }

    /// Returns true once the validity duration has elapsed.
    pub fn is_expired(&self, now: I) -> bool {
        self.age(now) >= self.validity
    }

    /// Time left before the code should rotate, saturating at zero.
    pub fn remaining(&self, now: I) -> Duration {
        self.validity.saturating_sub(self.age(now))
    }
}

/// How long a superseded code is still honoured.
///
/// Only the single most recent previous epoch is ever considered. Its code is
/// accepted while `now - issued_at < validity + window`, with `window` capped
/// at one validity interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GracePolicy {
    window: Duration,
}

impl GracePolicy {
    /// Honour the previous code for `window` after its natural expiry.
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Accept only the current code.
    pub fn disabled() -> Self {
        Self { window: Duration::ZERO }
    }

    /// Configured window, before capping.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether a superseded code is still within its grace window.
    fn honours<I: Timestamp>(&self, code: &Code<I>, now: I) -> bool {
        let window = self.window.min(code.validity);
        !window.is_zero() && code.age(now) < code.validity + window
    }
}

impl Default for GracePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_VALIDITY)
    }
}

/// Issues and rotates codes on a fixed cadence.
///
/// Pure function of the supplied time and the injected random source: no
/// clock reads, no I/O.
#[derive(Debug)]
pub struct CodeRotator<I, R> {
    rng: R,
    validity: Duration,
    current: Code<I>,
    previous: Option<Code<I>>,
}

impl<I, R> CodeRotator<I, R>
where
    I: Timestamp,
    R: Rng,
{
    /// Create a rotator and issue epoch 0 at `now` with a random code.
    pub fn new(mut rng: R, validity: Duration, now: I) -> Self {
        let value = OtpCode::random(&mut rng);
        Self::with_initial(rng, value, validity, now)
    }

    /// Create a rotator whose first code is `value`.
    ///
    /// Later codes are drawn from `rng` as usual.
    pub fn with_initial(rng: R, value: OtpCode, validity: Duration, now: I) -> Self {
        let current = Code { value, epoch: Epoch { index: 0, issued_at: now }, validity };
        Self { rng, validity, current, previous: None }
    }

    /// The code currently on display.
    pub fn current(&self) -> &Code<I> {
        &self.current
    }

    /// The code that was current before the last rotation, if any.
    pub fn previous(&self) -> Option<&Code<I>> {
        self.previous.as_ref()
    }

    /// Lifetime of each code.
    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Rotate if the current code has expired, otherwise do nothing.
    ///
    /// Rotates at most once per call: after a long pause the new code is
    /// issued at `now`, not back-dated to when rotation was due. Draws are
    /// uniform and may repeat the previous value.
    pub fn tick(&mut self, now: I) -> &Code<I> {
        if self.current.is_expired(now) {
            let next = Code {
                value: OtpCode::random(&mut self.rng),
                epoch: Epoch { index: self.current.epoch.index + 1, issued_at: now },
                validity: self.validity,
            };
            self.previous = Some(std::mem::replace(&mut self.current, next));

            tracing::trace!(epoch = self.current.epoch.index, code = %self.current.value, "code rotated");
        }

        &self.current
    }

    /// Find the epoch `candidate` belongs to, honouring `grace`.
    ///
    /// The current epoch wins when the same digits were drawn twice in a row.
    /// Callers should [`tick`](Self::tick) first so `current` is not stale.
    pub fn matching(&self, candidate: OtpCode, now: I, grace: GracePolicy) -> Option<Epoch<I>> {
        if self.current.value == candidate && !self.current.is_expired(now) {
            return Some(self.current.epoch);
        }

        self.previous
            .as_ref()
            .filter(|prev| prev.value == candidate && grace.honours(prev, now))
            .map(|prev| prev.epoch)
    }
}
