//! Wire encoding errors.

use thiserror::Error;

/// Errors from encoding or decoding payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// CBOR serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// CBOR deserialization failed.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Payload exceeds [`crate::MAX_PAYLOAD_SIZE`].
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum permitted size.
        max: usize,
    },
}
