//! Presenter surface payloads.

use serde::{Deserialize, Serialize};

/// Read-only view rendered by the presenter display.
///
/// Pushed or polled at least once per second so the countdown stays accurate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenterSnapshot {
    /// Session this snapshot belongs to.
    pub session_id: u64,
    /// Room or class label shown in the header.
    pub room_label: String,
    /// Current code, always four digits with leading zeros.
    pub current_code: String,
    /// Whole seconds until the code rotates, rounded up.
    pub remaining_validity_secs: u32,
    /// Participants whose attendance has been accepted.
    pub accepted_count: u32,
    /// Attempts created so far, terminal or not.
    pub total_attempts: u32,
    /// False once the presenter has ended the session.
    pub open: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serde() {
        let snapshot = PresenterSnapshot {
            session_id: 0xdead_beef,
            room_label: "Computer Science - Room 301".to_string(),
            current_code: "0042".to_string(),
            remaining_validity_secs: 2,
            accepted_count: 17,
            total_attempts: 19,
            open: true,
        };

        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&snapshot, &mut bytes).expect("encode");

        let decoded: PresenterSnapshot = ciborium::de::from_reader(&bytes[..]).expect("decode");
        assert_eq!(snapshot, decoded);
    }
}
