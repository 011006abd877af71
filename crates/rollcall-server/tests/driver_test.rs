//! Session driver tests
//!
//! Run on a paused tokio clock: sleeps complete instantly once every task is
//! idle, so verifier delays and deadlines cost no wall-clock time.

use std::time::Duration;

use rollcall_core::{
    AttemptState, AttemptTimeouts, CaptureSample, OtpCode, ParticipantId, RejectionReason,
    SessionConfig, SubmissionError, Verdict, VerifierError,
};
use rollcall_harness::{PendingVerifier, ScriptedVerifier};
use rollcall_proto::{
    ParticipantRequest, ParticipantResponse, PresenterSnapshot, ProvideCapture, SubmitCode,
};
use rollcall_server::{DriverConfig, ServerError, SessionDriver, SystemEnv};

const ROOM: &str = "Computer Science - Room 301";

fn config() -> DriverConfig {
    DriverConfig { initial_code: OtpCode::new(8547), ..DriverConfig::default() }
}

fn config_with_timeouts(capture: Duration, verifier: Duration) -> DriverConfig {
    let session = SessionConfig { timeouts: AttemptTimeouts { capture, verifier }, ..SessionConfig::default() };
    DriverConfig { session, ..config() }
}

fn scripted(delay: Duration) -> ScriptedVerifier<SystemEnv> {
    ScriptedVerifier::new(SystemEnv::new()).with_delay(delay)
}

/// Let spawned tasks run to quiescence.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn reference_scenario_accepts_after_verification() {
    let verifier = scripted(Duration::from_secs(3));
    let recorder = verifier.clone();
    let driver = SessionDriver::open(SystemEnv::new(), verifier, ROOM, config()).unwrap();

    let snapshot = driver.snapshot().await;
    assert_eq!(snapshot.current_code.to_string(), "8547");
    assert_eq!(snapshot.remaining_validity_secs(), 2);

    let alice = ParticipantId::new("alice");
    let attempt = driver.submit_code(alice.clone(), "8547").await.unwrap();
    driver.provide_capture(attempt, CaptureSample::new(vec![7; 64])).await.unwrap();

    let start = tokio::time::Instant::now();
    let state = driver.wait_for_outcome(attempt).await.unwrap();

    assert!(matches!(state, AttemptState::Accepted { .. }));
    assert!(start.elapsed() >= Duration::from_secs(3));

    let calls = recorder.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].participant, alice);
    assert_eq!(calls[0].room_label, ROOM);
    assert_eq!(calls[0].epoch, 0);

    let snapshot = driver.snapshot().await;
    assert_eq!(snapshot.accepted_count, 1);
    assert_eq!(snapshot.total_attempts, 1);
    assert_eq!(snapshot.pending_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn verifier_reject_is_reported_with_detail() {
    let verifier = scripted(Duration::from_secs(1));
    verifier.push(Ok(Verdict::Reject { reason: "face not recognised".to_string() }));
    let driver = SessionDriver::open(SystemEnv::new(), verifier, ROOM, config()).unwrap();

    let attempt = driver.submit_code(ParticipantId::new("bob"), "8547").await.unwrap();
    driver.provide_capture(attempt, CaptureSample::new(vec![1])).await.unwrap();

    let state = driver.wait_for_outcome(attempt).await.unwrap();
    assert_eq!(state, AttemptState::Rejected {
        reason: RejectionReason::VerifierRejected { detail: "face not recognised".to_string() }
    });
    assert_eq!(driver.snapshot().await.accepted_count, 0);
}

#[tokio::test(start_paused = true)]
async fn verifier_error_rejects_as_unavailable() {
    let verifier = scripted(Duration::ZERO);
    verifier.push(Err(VerifierError::Unavailable("backend down".to_string())));
    let driver = SessionDriver::open(SystemEnv::new(), verifier, ROOM, config()).unwrap();

    let participant = ParticipantId::new("carol");
    let attempt = driver.submit_code(participant.clone(), "8547").await.unwrap();
    driver.provide_capture(attempt, CaptureSample::new(vec![1])).await.unwrap();

    let state = driver.wait_for_outcome(attempt).await.unwrap();
    assert_eq!(state, AttemptState::Rejected { reason: RejectionReason::VerifierUnavailable });

    // A rejected participant may try again
    let code = driver.snapshot().await.current_code.to_string();
    assert!(driver.submit_code(participant, &code).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn silent_verifier_times_out() {
    let verifier = PendingVerifier::new();
    let recorder = verifier.clone();
    let config = config_with_timeouts(Duration::from_secs(60), Duration::from_secs(5));
    let driver = SessionDriver::open(SystemEnv::new(), verifier, ROOM, config).unwrap();

    let attempt = driver.submit_code(ParticipantId::new("dave"), "8547").await.unwrap();
    driver.provide_capture(attempt, CaptureSample::new(vec![1])).await.unwrap();

    let start = tokio::time::Instant::now();
    let state = driver.wait_for_outcome(attempt).await.unwrap();

    assert_eq!(state, AttemptState::Rejected { reason: RejectionReason::VerifierUnavailable });
    assert!(start.elapsed() >= Duration::from_secs(5));

    settle().await;
    assert_eq!(recorder.started(), 1);
    assert_eq!(recorder.abandoned(), 1);
}

#[tokio::test(start_paused = true)]
async fn capture_deadline_enforced_by_ticks() {
    let config = config_with_timeouts(Duration::from_secs(3), Duration::from_secs(10));
    let driver = SessionDriver::open(SystemEnv::new(), scripted(Duration::ZERO), ROOM, config).unwrap();

    let attempt = driver.submit_code(ParticipantId::new("erin"), "8547").await.unwrap();

    let state = driver.wait_for_outcome(attempt).await.unwrap();
    assert_eq!(state, AttemptState::Rejected { reason: RejectionReason::Timeout });

    let err = driver.provide_capture(attempt, CaptureSample::new(vec![1])).await.unwrap_err();
    assert!(!err.is_recoverable());
}

#[tokio::test(start_paused = true)]
async fn close_cancels_verification_and_refuses_new_work() {
    let verifier = PendingVerifier::new();
    let recorder = verifier.clone();
    let driver = SessionDriver::open(SystemEnv::new(), verifier, ROOM, config()).unwrap();

    let verifying = driver.submit_code(ParticipantId::new("frank"), "8547").await.unwrap();
    let waiting = driver.submit_code(ParticipantId::new("grace"), "8547").await.unwrap();
    driver.provide_capture(verifying, CaptureSample::new(vec![1])).await.unwrap();
    settle().await;
    assert_eq!(recorder.started(), 1);

    let summary = driver.close().await;
    assert!(!summary.open);
    assert_eq!(summary.pending_attempts, 0);

    let closed = AttemptState::Rejected { reason: RejectionReason::SessionClosed };
    assert_eq!(driver.attempt_state(verifying).await, Some(closed.clone()));
    assert_eq!(driver.attempt_state(waiting).await, Some(closed));

    settle().await;
    assert_eq!(recorder.abandoned(), 1);

    let err = driver.submit_code(ParticipantId::new("heidi"), "8547").await.unwrap_err();
    assert_eq!(err, SubmissionError::SessionClosed);
}

#[tokio::test(start_paused = true)]
async fn ticker_rotates_and_grace_admits_previous_code() {
    let driver = SessionDriver::open(SystemEnv::new(), scripted(Duration::ZERO), ROOM, config()).unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    let snapshot = driver.snapshot().await;
    assert_eq!(snapshot.epoch, 1);

    // Typed while the display was changing
    let attempt = driver.submit_code(ParticipantId::new("ivan"), "8547").await;
    assert!(attempt.is_ok());
}

#[tokio::test(start_paused = true)]
async fn second_submission_while_pending_is_duplicate() {
    let driver = SessionDriver::open(SystemEnv::new(), scripted(Duration::ZERO), ROOM, config()).unwrap();
    let judy = ParticipantId::new("judy");

    let attempt = driver.submit_code(judy.clone(), "8547").await.unwrap();
    let err = driver.submit_code(judy.clone(), "8547").await.unwrap_err();

    assert_eq!(err, SubmissionError::DuplicateAttempt { participant: judy, attempt });
    assert!(err.is_recoverable());
}

#[tokio::test(start_paused = true)]
async fn subscribers_see_changes() {
    let driver = SessionDriver::open(SystemEnv::new(), scripted(Duration::ZERO), ROOM, config()).unwrap();
    let mut changes = driver.subscribe();

    driver.submit_code(ParticipantId::new("kim"), "8547").await.unwrap();
    assert!(changes.has_changed().unwrap());
}

#[tokio::test(start_paused = true)]
async fn wait_for_unknown_attempt_fails() {
    let driver = SessionDriver::open(SystemEnv::new(), scripted(Duration::ZERO), ROOM, config()).unwrap();

    let result = driver.wait_for_outcome(rollcall_core::AttemptId::new(99)).await;
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn wire_requests_round_trip() {
    let driver = SessionDriver::open(SystemEnv::new(), scripted(Duration::from_secs(3)), ROOM, config()).unwrap();

    let submit = ParticipantRequest::SubmitCode(SubmitCode {
        participant_id: "liam".to_string(),
        code: "8547".to_string(),
    });
    let bytes = driver.handle_bytes(&rollcall_proto::encode(&submit).unwrap()).await.unwrap();
    let response: ParticipantResponse = rollcall_proto::decode(&bytes).unwrap();
    assert_eq!(response, ParticipantResponse::AttemptCreated { attempt_id: 1, epoch: 0 });

    let capture = ParticipantRequest::ProvideCapture(ProvideCapture {
        attempt_id: 1,
        media_type: Some("image/jpeg".to_string()),
        sample: vec![9u8; 32].into(),
    });
    assert_eq!(driver.handle(capture).await, ParticipantResponse::Pending { attempt_id: 1 });
    assert_eq!(
        driver.handle(ParticipantRequest::PollAttempt { attempt_id: 1 }).await,
        ParticipantResponse::Pending { attempt_id: 1 }
    );

    driver.wait_for_outcome(rollcall_core::AttemptId::new(1)).await.unwrap();
    let polled = driver.handle(ParticipantRequest::PollAttempt { attempt_id: 1 }).await;
    assert!(matches!(polled, ParticipantResponse::Accepted { attempt_id: 1, .. }));

    let wrong = ParticipantRequest::SubmitCode(SubmitCode {
        participant_id: "mia".to_string(),
        code: "85a7".to_string(),
    });
    assert_eq!(driver.handle(wrong).await, ParticipantResponse::MalformedCode);

    assert_eq!(
        driver.handle(ParticipantRequest::PollAttempt { attempt_id: 42 }).await,
        ParticipantResponse::UnknownAttempt { attempt_id: 42 }
    );
}

#[tokio::test(start_paused = true)]
async fn second_capture_keeps_attempt_verifying() {
    let driver = SessionDriver::open(SystemEnv::new(), scripted(Duration::from_secs(3)), ROOM, config()).unwrap();

    let attempt = driver.submit_code(ParticipantId::new("noah"), "8547").await.unwrap();
    let capture = || {
        ParticipantRequest::ProvideCapture(ProvideCapture {
            attempt_id: attempt.value(),
            media_type: None,
            sample: vec![3u8; 16].into(),
        })
    };
    assert_eq!(driver.handle(capture()).await, ParticipantResponse::Pending { attempt_id: 1 });

    let second = driver.handle(capture()).await;
    assert_eq!(
        second,
        ParticipantResponse::InvalidTransition { attempt_id: 1, state: "verifying".to_string() }
    );
    assert!(!second.is_terminal());
    assert_eq!(driver.attempt_state(attempt).await, Some(AttemptState::Verifying));

    let state = driver.wait_for_outcome(attempt).await.unwrap();
    assert!(matches!(state, AttemptState::Accepted { .. }));
}

#[tokio::test(start_paused = true)]
async fn cancelled_attempt_frees_participant() {
    let verifier = scripted(Duration::ZERO);
    let recorder = verifier.clone();
    let driver = SessionDriver::open(SystemEnv::new(), verifier, ROOM, config()).unwrap();

    let submit = || {
        ParticipantRequest::SubmitCode(SubmitCode {
            participant_id: "olivia".to_string(),
            code: "8547".to_string(),
        })
    };
    assert_eq!(
        driver.handle(submit()).await,
        ParticipantResponse::AttemptCreated { attempt_id: 1, epoch: 0 }
    );
    assert_eq!(
        driver.handle(submit()).await,
        ParticipantResponse::DuplicateAttempt { attempt_id: 1 }
    );

    assert_eq!(
        driver.handle(ParticipantRequest::CancelAttempt { attempt_id: 1 }).await,
        ParticipantResponse::Rejected { attempt_id: 1, reason: RejectionReason::Cancelled }
    );
    assert_eq!(
        driver.handle(ParticipantRequest::CancelAttempt { attempt_id: 1 }).await,
        ParticipantResponse::AlreadyTerminal { attempt_id: 1 }
    );

    assert_eq!(
        driver.handle(submit()).await,
        ParticipantResponse::AttemptCreated { attempt_id: 2, epoch: 0 }
    );
    let snapshot = driver.snapshot().await;
    assert_eq!(snapshot.total_attempts, 2);
    assert_eq!(snapshot.pending_attempts, 1);
    assert!(recorder.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn garbage_request_is_protocol_error() {
    let driver = SessionDriver::open(SystemEnv::new(), scripted(Duration::ZERO), ROOM, config()).unwrap();

    let result = driver.handle_bytes(&[0xff, 0x00, 0x13]).await;
    assert!(matches!(result, Err(ServerError::Protocol(_))));
}

#[tokio::test(start_paused = true)]
async fn presenter_bytes_decode_to_snapshot() {
    let driver = SessionDriver::open(SystemEnv::new(), scripted(Duration::ZERO), ROOM, config()).unwrap();

    let bytes = driver.presenter_bytes().await.unwrap();
    let snapshot: PresenterSnapshot = rollcall_proto::decode(&bytes).unwrap();

    assert_eq!(snapshot.session_id, driver.id().0);
    assert_eq!(snapshot.room_label, ROOM);
    assert_eq!(snapshot.current_code, "8547");
    assert_eq!(snapshot.remaining_validity_secs, 2);
    assert!(snapshot.open);
}

#[tokio::test]
async fn invalid_config_is_refused() {
    let mut config = config();
    config.tick_interval = Duration::from_secs(5);

    let result = SessionDriver::open(SystemEnv::new(), scripted(Duration::ZERO), ROOM, config);
    assert!(matches!(result, Err(ServerError::Config(_))));

    let zero = DriverConfig {
        session: SessionConfig { cadence: Duration::ZERO, ..SessionConfig::default() },
        ..DriverConfig::default()
    };
    assert!(zero.validate().is_err());
    assert!(DriverConfig::default().validate().is_ok());
}
