//! Rollcall wire payloads.
//!
//! Request and response types exchanged between the attendance session and
//! its two surfaces:
//!
//! - Presenter: polls [`PresenterSnapshot`] at least once per second to render
//!   the live code and the running headcount.
//! - Participant: sends [`ParticipantRequest`]s and receives
//!   [`ParticipantResponse`]s.
//!
//! Payloads are CBOR-encoded. Framing and routing (HTTP, WebSocket, ...) are
//! left to the transport; the session identifier is the routing key.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod payloads;

pub use error::ProtocolError;
pub use payloads::{
    participant::{
        ParticipantRequest, ParticipantResponse, ProvideCapture, RejectionReason, SubmitCode,
    },
    presenter::PresenterSnapshot,
};
use serde::{Serialize, de::DeserializeOwned};

/// Upper bound on an encoded payload. Capture samples dominate the size.
pub const MAX_PAYLOAD_SIZE: usize = 8 * 1024 * 1024;

/// Encode a payload as CBOR.
pub fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(payload, &mut buf)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;

    if buf.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge { size: buf.len(), max: MAX_PAYLOAD_SIZE });
    }

    Ok(buf)
}

/// Decode a CBOR payload.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    if bytes.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge { size: bytes.len(), max: MAX_PAYLOAD_SIZE });
    }

    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_garbage() {
        let result: Result<SubmitCode, _> = decode(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    proptest::proptest! {
        #[test]
        fn decode_never_panics(bytes in proptest::collection::vec(proptest::num::u8::ANY, 0..256)) {
            let _ = decode::<ParticipantRequest>(&bytes);
        }
    }

    #[test]
    fn decode_rejects_oversized_input() {
        let bytes = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let result: Result<SubmitCode, _> = decode(&bytes);
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { .. })));
    }
}
