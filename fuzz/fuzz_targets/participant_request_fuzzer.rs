//! Fuzz target for participant wire decoding
//!
//! Untrusted bytes from participant devices must never panic the decoder,
//! and anything that decodes must re-encode.
//!
//! # Invariants
//!
//! - `decode` never panics, on any input
//! - A decoded request re-encodes and decodes to an equal value

#![no_main]

use libfuzzer_sys::fuzz_target;
use rollcall_proto::ParticipantRequest;

fuzz_target!(|data: &[u8]| {
    let Ok(request) = rollcall_proto::decode::<ParticipantRequest>(data) else {
        return;
    };

    let encoded = rollcall_proto::encode(&request).expect("decoded request must re-encode");
    let decoded: ParticipantRequest =
        rollcall_proto::decode(&encoded).expect("re-encoded request must decode");
    assert_eq!(decoded, request);
});
