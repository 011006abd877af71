//! Biometric verifier boundary.
//!
//! The session never inspects a capture. It hands the opaque sample and some
//! context to a [`VerifierAdapter`] and waits for a tagged [`Verdict`]. Real
//! deployments plug a face-matching backend in here; tests plug in scripted
//! doubles.
//!
//! Adapters must tolerate being cancelled: the driver drops the future when
//! the owning attempt times out or the session closes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::{attempt::AttemptId, participant::ParticipantId, session::SessionId};

/// A captured sample as provided by the participant surface.
///
/// # Security
///
/// - **Debug Redaction**: biometric bytes are never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct CaptureSample {
    /// Raw sample bytes (e.g. an encoded still frame).
    pub data: Bytes,
    /// MIME type, if the surface reported one.
    pub media_type: Option<String>,
}

impl CaptureSample {
    /// Wrap raw bytes without a media type.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into(), media_type: None }
    }

    /// Set the media type.
    #[must_use]
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// Lightweight reference kept on the attempt after the bytes move on.
    pub fn reference(&self) -> SampleRef {
        SampleRef { len: self.data.len(), media_type: self.media_type.clone() }
    }
}

impl std::fmt::Debug for CaptureSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSample")
            .field("data", &format!("<redacted {} bytes>", self.data.len()))
            .field("media_type", &self.media_type)
            .finish()
    }
}

/// What an attempt remembers about its sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRef {
    /// Sample size in bytes.
    pub len: usize,
    /// MIME type, if known.
    pub media_type: Option<String>,
}

/// Session context handed to the verifier alongside the sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// Session the attempt belongs to.
    pub session_id: SessionId,
    /// Room or class label.
    pub room_label: String,
    /// Who is claiming attendance.
    pub participant: ParticipantId,
    /// Attempt being verified.
    pub attempt: AttemptId,
    /// Code epoch the attempt was bound to at submission.
    pub epoch: u64,
}

/// Verifier decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Sample matches the participant.
    Accept {
        /// Match confidence in `[0, 1]`.
        confidence: f32,
    },
    /// Sample does not match, or is unusable.
    Reject {
        /// Human-readable explanation.
        reason: String,
    },
}

/// Verifier could not reach a decision.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifierError {
    /// Backend down, overloaded, or otherwise unable to answer.
    #[error("verifier unavailable: {0}")]
    Unavailable(String),
}

/// External biometric decision boundary.
#[async_trait]
pub trait VerifierAdapter: Send + Sync + 'static {
    /// Decide whether `sample` proves `context.participant` is present.
    async fn verify(
        &self,
        sample: CaptureSample,
        context: SessionContext,
    ) -> Result<Verdict, VerifierError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_debug_is_redacted() {
        let sample = CaptureSample::new(&b"raw-face"[..]).with_media_type("image/png");
        let debug = format!("{sample:?}");

        assert!(debug.contains("<redacted 8 bytes>"));
        assert!(!debug.contains("raw-face"));
    }

    #[test]
    fn reference_keeps_size_and_type() {
        let sample = CaptureSample::new(vec![0u8; 1024]).with_media_type("image/jpeg");
        let reference = sample.reference();

        assert_eq!(reference.len, 1024);
        assert_eq!(reference.media_type.as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn unavailable_display() {
        let err = VerifierError::Unavailable("connection refused".to_string());
        insta::assert_snapshot!(err.to_string(), @"verifier unavailable: connection refused");
    }
}
